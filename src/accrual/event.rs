//! Queue events: an order snapshot plus the bookkeeping the core needs to
//! route and retry it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::order::OrderSnapshot;

/// Which of the three internal queues an event belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    New,
    InProgress,
    DeadLetter,
}

/// An order snapshot in flight through the pipeline, with a failure counter
/// that survives across successor events derived from the same order.
#[derive(Debug, Clone)]
pub struct Event {
    pub snapshot: OrderSnapshot,
    pub submitted_at_micros: i64,
    failures: Arc<AtomicU32>,
}

impl Event {
    /// A brand-new event for a freshly uploaded order: failure count starts at zero.
    pub fn new(snapshot: OrderSnapshot) -> Self {
        Self {
            snapshot,
            submitted_at_micros: now_micros(),
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A successor event built from a re-fetched snapshot, carrying the
    /// originating event's failure count forward.
    pub fn next(&self, snapshot: OrderSnapshot) -> Self {
        Self {
            snapshot,
            submitted_at_micros: now_micros(),
            failures: self.failures.clone(),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn add_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Running counters for the whole adapter, exposed via `Stats`.
#[derive(Debug, Default)]
pub struct EventStats {
    submitted: AtomicU64,
    processed: AtomicU64,
    lost: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time snapshot of [`EventStats`] plus the current depth of each
/// of the three queues, mirroring the original adapter's `RemainNew`/
/// `RemainInProgress`/`RemainDLQ` stats.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct EventStatsSnapshot {
    pub submitted: u64,
    pub processed: u64,
    pub lost: u64,
    pub failures: u64,
    pub size_new: usize,
    pub size_in_progress: usize,
    pub size_dlq: usize,
}

impl EventStats {
    pub fn incr_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::AcqRel);
    }

    pub fn incr_processed(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn incr_lost(&self) {
        self.lost.fetch_add(1, Ordering::AcqRel);
    }

    pub fn incr_failures(&self) {
        self.failures.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> EventStatsSnapshot {
        EventStatsSnapshot {
            submitted: self.submitted.load(Ordering::Acquire),
            processed: self.processed.load(Ordering::Acquire),
            lost: self.lost.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn next_preserves_failure_count() {
        let event = Event::new(OrderSnapshot::new(1, Uuid::nil()));
        event.add_failure();
        event.add_failure();
        let successor = event.next(OrderSnapshot::new(1, Uuid::nil()));
        assert_eq!(successor.failures(), 2);
    }

    #[test]
    fn new_event_starts_at_zero_failures() {
        let event = Event::new(OrderSnapshot::new(1, Uuid::nil()));
        assert_eq!(event.failures(), 0);
    }

    #[test]
    fn stats_snapshot_reflects_increments() {
        let stats = EventStats::default();
        stats.incr_submitted();
        stats.incr_submitted();
        stats.incr_processed();
        let snap = stats.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.processed, 1);
    }
}
