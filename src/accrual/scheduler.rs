//! Per-queue scheduler loop: batch-dequeue then dispatch to a bounded
//! worker pool, sleeping between batches (interruptibly) when a queue is
//! empty or a worker asked for a throttling delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::event::Event;
use super::queue::BoundedQueue;
use super::shutdown::ShutdownToken;

/// A unit of work a scheduler dispatches an event to. Implementations decide
/// what "processing" an event means (polling the provider, retrying a DLQ
/// entry) and how long the worker that handled it should pause afterward.
#[async_trait]
pub trait EventJob: Send + Sync {
    async fn run(&self, event: Event, worker_id: usize);
}

pub struct Scheduler {
    queue: BoundedQueue<Event>,
    job: Arc<dyn EventJob>,
    batch_delay: Duration,
    concurrency: usize,
    label: &'static str,
}

impl Scheduler {
    pub fn new(
        queue: BoundedQueue<Event>,
        job: Arc<dyn EventJob>,
        batch_delay: Duration,
        concurrency: usize,
        label: &'static str,
    ) -> Self {
        Self {
            queue,
            job,
            batch_delay,
            concurrency,
            label,
        }
    }

    /// Runs until `shutdown` is triggered. Each iteration reads `n :=
    /// queue.size()`, drains that whole observed backlog, and fans it out
    /// across a bounded pool of `concurrency` workers via a task channel
    /// sized exactly to `n`, so the non-blocking offer into it can never
    /// fail for the batch it was sized for.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        loop {
            if shutdown.is_triggered() {
                return;
            }

            let n = self.queue.size();
            if n > 0 {
                let batch = self.queue.dequeue_batch(n).await;
                if !batch.is_empty() {
                    self.dispatch(batch).await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.batch_delay) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn dispatch(&self, batch: Vec<Event>) {
        let batch_len = batch.len();
        let (tx, rx) = mpsc::channel::<Event>(batch_len);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let worker_count = self.concurrency.min(batch_len).max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job = self.job.clone();
            let rx = rx.clone();
            let label = self.label;
            handles.push(tokio::spawn(async move {
                loop {
                    let event = { rx.lock().await.recv().await };
                    match event {
                        Some(event) => {
                            debug!(queue = label, worker_id, "processing event");
                            job.run(event, worker_id).await;
                        }
                        None => break,
                    }
                }
            }));
        }

        // Channel is sized exactly to the batch just dequeued, so this
        // non-blocking-in-spirit send sequence can never back up.
        for event in batch {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        drop(tx);

        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingJob {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventJob for CountingJob {
        async fn run(&self, _event: Event, _worker_id: usize) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatch_processes_every_event_in_batch() {
        let queue: BoundedQueue<Event> = BoundedQueue::new(10);
        for _ in 0..5 {
            queue
                .enqueue(Event::new(OrderSnapshot::new(12345678903, Uuid::nil())))
                .await
                .unwrap();
        }
        let count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(CountingJob {
            count: count.clone(),
        });
        let scheduler = Scheduler::new(queue, job, Duration::from_millis(10), 2, "test");
        let batch = scheduler.queue.dequeue_batch(5).await;
        scheduler.dispatch(batch).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn run_drains_a_backlog_deeper_than_concurrency_in_one_tick() {
        let queue: BoundedQueue<Event> = BoundedQueue::new(100);
        for _ in 0..20 {
            queue
                .enqueue(Event::new(OrderSnapshot::new(12345678903, Uuid::nil())))
                .await
                .unwrap();
        }
        let count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(CountingJob {
            count: count.clone(),
        });
        let controller = crate::accrual::shutdown::ShutdownController::new();
        let scheduler = Arc::new(Scheduler::new(
            queue,
            job,
            Duration::from_secs(3600),
            2,
            "test",
        ));
        let token = controller.token();
        let handle = tokio::spawn(async move { scheduler.run(token).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.trigger();
        let _ = handle.await;
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }
}
