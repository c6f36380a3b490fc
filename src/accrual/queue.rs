//! Bounded, non-blocking, closeable FIFO queue.
//!
//! Mirrors a buffered channel guarded by a close flag: `enqueue` never
//! blocks, returning `QueueFull` if the buffer is saturated and
//! `QueueClosed` once `close()` has been called. `dequeue` never blocks
//! either, returning `None` when empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{GophermartError, Result};

struct Inner<T> {
    items: RwLock<VecDeque<T>>,
    count: AtomicI64,
    capacity: usize,
    closed: AtomicU32,
}

/// A bounded FIFO queue cloneable across tasks; clones share the same buffer.
#[derive(Clone)]
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
                count: AtomicI64::new(0),
                capacity,
                closed: AtomicU32::new(0),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) == 1
    }

    /// Marks the queue closed. Idempotent; subsequent enqueues fail.
    pub async fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _guard = self.inner.items.write().await;
        }
    }

    /// Current number of buffered items.
    pub fn size(&self) -> usize {
        self.inner.count.load(Ordering::Acquire).max(0) as usize
    }

    /// Maximum number of items the queue will buffer.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Attempts to enqueue without blocking. Fails fast on a closed or full queue.
    pub async fn enqueue(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return Err(GophermartError::QueueClosed);
        }
        let mut items = self.inner.items.write().await;
        if self.is_closed() {
            return Err(GophermartError::QueueClosed);
        }
        if items.len() >= self.inner.capacity {
            return Err(GophermartError::QueueFull);
        }
        items.push_back(item);
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Attempts to dequeue without blocking.
    pub async fn dequeue(&self) -> Option<T> {
        let mut items = self.inner.items.write().await;
        let item = items.pop_front();
        if item.is_some() {
            self.inner.count.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// Dequeues up to `n` items in FIFO order. Returns fewer if the queue
    /// empties before `n` are collected.
    pub async fn dequeue_batch(&self, n: usize) -> Vec<T> {
        let mut items = self.inner.items.write().await;
        let take = n.min(items.len());
        let batch: Vec<T> = items.drain(..take).collect();
        if !batch.is_empty() {
            self.inner
                .count
                .fetch_sub(batch.len() as i64, Ordering::AcqRel);
        }
        batch
    }
}
