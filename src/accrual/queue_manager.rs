//! Routes events between the NEW / IN_PROGRESS / DLQ queues based on the
//! order status carried in the event's snapshot, and tracks the stats the
//! adapter exposes.

use std::sync::Arc;

use tracing::warn;

use crate::domain::order::OrderStatus;

use super::event::{Event, EventStats, EventStatsSnapshot, EventType};
use super::queue::BoundedQueue;

/// Result of routing an event, distinct from a plain success/failure so
/// callers can tell "queued" apart from "missed" apart from "lost forever"
/// without racing a shared counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Landed in its target queue (NEW or IN_PROGRESS).
    Queued,
    /// Target queue was full; landed in the dead-letter queue instead.
    DeadLettered,
    /// Terminal status; absorbed as processed, never queued.
    Terminal,
    /// Target queue and DLQ were both full: the event is gone.
    Lost,
}

pub struct QueueManager {
    queue_new: BoundedQueue<Event>,
    queue_in_progress: BoundedQueue<Event>,
    queue_dead_letter: BoundedQueue<Event>,
    stats: Arc<EventStats>,
}

impl QueueManager {
    pub fn new(new_capacity: usize, in_progress_capacity: usize, dlq_capacity: usize) -> Self {
        Self {
            queue_new: BoundedQueue::new(new_capacity),
            queue_in_progress: BoundedQueue::new(in_progress_capacity),
            queue_dead_letter: BoundedQueue::new(dlq_capacity),
            stats: Arc::new(EventStats::default()),
        }
    }

    pub fn queue(&self, event_type: EventType) -> &BoundedQueue<Event> {
        match event_type {
            EventType::New => &self.queue_new,
            EventType::InProgress => &self.queue_in_progress,
            EventType::DeadLetter => &self.queue_dead_letter,
        }
    }

    pub fn stats(&self) -> EventStatsSnapshot {
        EventStatsSnapshot {
            size_new: self.queue_new.size(),
            size_in_progress: self.queue_in_progress.size(),
            size_dlq: self.queue_dead_letter.size(),
            ..self.stats.snapshot()
        }
    }

    /// Routes an event according to its snapshot's status. Terminal statuses
    /// increment the processed counter and are not re-queued.
    pub async fn route(&self, event: Event) -> RouteOutcome {
        match event.snapshot.status {
            OrderStatus::New => match self.queue_new.enqueue(event.clone()).await {
                Ok(()) => RouteOutcome::Queued,
                Err(_) => self.emit_dlq(event).await,
            },
            OrderStatus::Registered | OrderStatus::Processing => {
                match self.queue_in_progress.enqueue(event.clone()).await {
                    Ok(()) => RouteOutcome::Queued,
                    Err(_) => self.emit_dlq(event).await,
                }
            }
            OrderStatus::Invalid | OrderStatus::Processed => {
                self.stats.incr_processed();
                RouteOutcome::Terminal
            }
        }
    }

    /// Attempts to move an event that failed to enqueue normally into the
    /// dead-letter queue instead. Overflow there counts the event as lost.
    async fn emit_dlq(&self, event: Event) -> RouteOutcome {
        self.stats.incr_failures();
        match self.queue_dead_letter.enqueue(event).await {
            Ok(()) => RouteOutcome::DeadLettered,
            Err(err) => {
                self.stats.incr_lost();
                warn!("event missed: dead-letter queue rejected enqueue: {err}");
                RouteOutcome::Lost
            }
        }
    }

    /// Submits a freshly uploaded order into the pipeline. Returns `false`
    /// iff the event was lost outright without entering any queue.
    pub async fn submit_order(&self, snapshot: crate::domain::order::OrderSnapshot) -> bool {
        self.stats.incr_submitted();
        let event = Event::new(snapshot);
        !matches!(self.route(event).await, RouteOutcome::Lost)
    }
}
