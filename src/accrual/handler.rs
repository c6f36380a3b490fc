//! Per-event handlers: fetch the provider's current view of an order,
//! persist it, and decide how long the worker that ran this job should
//! sleep before picking up its next one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::order::OrderSnapshot;
use crate::error::GophermartError;

use super::client::{AccrualClient, PollOutcome};
use super::event::Event;
use super::repository::OrderRepository;
use super::shutdown::ShutdownToken;

const DELAY_CLIENT_NOT_ALIVE: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_EVENT_FAILURES: u32 = 5;

/// What a worker should do after a job returns.
pub enum PostJobAction {
    /// No throttling needed; pick up the next job immediately.
    Continue,
    /// Sleep for this long (interruptibly) before the next job.
    Sleep(Duration),
}

/// Handles a NEW or IN_PROGRESS event: polls the provider, persists the
/// result, and produces the successor event for re-routing.
pub struct OrderEventHandler<C, R> {
    client: Arc<C>,
    repository: Arc<R>,
}

impl<C, R> OrderEventHandler<C, R>
where
    C: AccrualClient,
    R: OrderRepository,
{
    pub fn new(client: Arc<C>, repository: Arc<R>) -> Self {
        Self { client, repository }
    }

    /// Runs one event through provider poll + persistence and returns the
    /// successor event (with failure count preserved) plus the action the
    /// caller's scheduler loop should take.
    pub async fn handle(&self, event: &Event) -> (Event, PostJobAction) {
        if !self.client.is_alive().await {
            return (event.clone(), PostJobAction::Sleep(DELAY_CLIENT_NOT_ALIVE));
        }

        let poll = match self.client.get_order_status(event.snapshot.order_id).await {
            Ok(poll) => poll,
            Err(GophermartError::RateLimited(retry_after)) => {
                return (event.clone(), PostJobAction::Sleep(retry_after));
            }
            Err(err) => {
                // Transient provider errors (5xx, unexpected status) are
                // recovered by re-routing the unchanged event; they are not
                // counted against the event's failure budget, only
                // persistence failures are.
                warn!(order_id = event.snapshot.order_id, %err, "accrual provider poll failed");
                return (event.clone(), PostJobAction::Continue);
            }
        };

        let next_snapshot = match poll {
            PollOutcome::NotRegistered => {
                // Not registered at the provider yet; retry unchanged, no
                // persistence attempted and no failure risk.
                return (event.clone(), PostJobAction::Continue);
            }
            PollOutcome::Status(status) => event.snapshot.with_status(
                status.status.into(),
                status.accrual,
            ),
        };

        if let Err(err) = self.repository.update_status(&next_snapshot).await {
            warn!(order_id = event.snapshot.order_id, %err, "failed to persist order status");
            event.add_failure();
            return (event.clone(), PostJobAction::Continue);
        }

        info!(
            order_id = next_snapshot.order_id,
            status = %next_snapshot.status,
            "order status persisted"
        );
        (event.next(next_snapshot), PostJobAction::Continue)
    }
}

/// Handles an event that landed in the dead-letter queue: discards it once
/// it has failed too many times, otherwise gives it another chance.
pub struct DlqEventHandler;

impl DlqEventHandler {
    /// Returns `true` if the event should be re-submitted, `false` if it was
    /// discarded for exceeding the failure budget.
    pub fn should_retry(event: &Event, max_failures: u32) -> bool {
        if event.failures() > max_failures {
            warn!(
                order_id = event.snapshot.order_id,
                failures = event.failures(),
                "discarding event: exceeded max failures"
            );
            false
        } else {
            true
        }
    }
}

/// Sleeps for `delay`, returning early if `token` is triggered first.
pub async fn sleep_with_shutdown(delay: Duration, token: &mut ShutdownToken) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = token.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::client::{AccrualClient, PollOutcome, ProviderOrderStatus, ProviderStatus};
    use crate::accrual::repository::OrderRepository;
    use crate::domain::order::OrderStatus;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    struct StubClient {
        alive: AtomicBool,
        status: ProviderStatus,
    }

    #[async_trait]
    impl AccrualClient for StubClient {
        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }

        async fn get_order_status(&self, _order_id: i64) -> Result<PollOutcome> {
            Ok(PollOutcome::Status(ProviderOrderStatus {
                order: "1".into(),
                status: self.status,
                accrual: None,
            }))
        }
    }

    struct RateLimitedClient {
        retry_after: Duration,
    }

    #[async_trait]
    impl AccrualClient for RateLimitedClient {
        async fn is_alive(&self) -> bool {
            true
        }

        async fn get_order_status(&self, _order_id: i64) -> Result<PollOutcome> {
            Err(GophermartError::RateLimited(self.retry_after))
        }
    }

    /// Fails `update_status` on its first call, succeeds on every call after.
    struct FlakyOnceRepo {
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl OrderRepository for FlakyOnceRepo {
        async fn create_order(
            &self,
            _user_id: Uuid,
            _order_id: i64,
        ) -> Result<crate::accrual::repository::CreateOrderOutcome> {
            unimplemented!()
        }
        async fn find_order_owner(&self, _order_id: i64) -> Result<Option<Uuid>> {
            unimplemented!()
        }
        async fn list_orders(&self, _user_id: Uuid) -> Result<Vec<crate::domain::order::Order>> {
            unimplemented!()
        }
        async fn list_non_terminal_orders(&self) -> Result<Vec<OrderSnapshot>> {
            unimplemented!()
        }
        async fn update_status(&self, _snapshot: &OrderSnapshot) -> Result<()> {
            if self
                .failed_once
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Err(GophermartError::Persistence("connection reset".into()));
            }
            Ok(())
        }
        async fn get_balance(&self, _user_id: Uuid) -> Result<crate::domain::balance::UserBalance> {
            unimplemented!()
        }
        async fn create_withdrawal(
            &self,
            _user_id: Uuid,
            _order_id: i64,
            _amount: rust_decimal::Decimal,
        ) -> Result<crate::accrual::repository::WithdrawOutcome> {
            unimplemented!()
        }
        async fn list_withdrawals(&self, _user_id: Uuid) -> Result<Vec<crate::domain::balance::Withdrawal>> {
            unimplemented!()
        }
    }

    struct NoopRepo;

    #[async_trait]
    impl OrderRepository for NoopRepo {
        async fn create_order(
            &self,
            _user_id: Uuid,
            _order_id: i64,
        ) -> Result<crate::accrual::repository::CreateOrderOutcome> {
            unimplemented!()
        }
        async fn find_order_owner(&self, _order_id: i64) -> Result<Option<Uuid>> {
            unimplemented!()
        }
        async fn list_orders(&self, _user_id: Uuid) -> Result<Vec<crate::domain::order::Order>> {
            unimplemented!()
        }
        async fn list_non_terminal_orders(&self) -> Result<Vec<OrderSnapshot>> {
            unimplemented!()
        }
        async fn update_status(&self, _snapshot: &OrderSnapshot) -> Result<()> {
            Ok(())
        }
        async fn get_balance(&self, _user_id: Uuid) -> Result<crate::domain::balance::UserBalance> {
            unimplemented!()
        }
        async fn create_withdrawal(
            &self,
            _user_id: Uuid,
            _order_id: i64,
            _amount: rust_decimal::Decimal,
        ) -> Result<crate::accrual::repository::WithdrawOutcome> {
            unimplemented!()
        }
        async fn list_withdrawals(&self, _user_id: Uuid) -> Result<Vec<crate::domain::balance::Withdrawal>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn not_alive_sleeps_without_persisting() {
        let client = Arc::new(StubClient {
            alive: AtomicBool::new(false),
            status: ProviderStatus::Processing,
        });
        let repo = Arc::new(NoopRepo);
        let handler = OrderEventHandler::new(client, repo);
        let event = Event::new(OrderSnapshot::new(1, Uuid::nil()));
        let (next, action) = handler.handle(&event).await;
        assert_eq!(next.snapshot.status, OrderStatus::New);
        assert!(matches!(action, PostJobAction::Sleep(d) if d == DELAY_CLIENT_NOT_ALIVE));
    }

    struct NotRegisteredClient;

    #[async_trait]
    impl AccrualClient for NotRegisteredClient {
        async fn is_alive(&self) -> bool {
            true
        }

        async fn get_order_status(&self, _order_id: i64) -> Result<PollOutcome> {
            Ok(PollOutcome::NotRegistered)
        }
    }

    /// Repository that panics if touched, used to assert a code path never persists.
    struct PanicsIfCalledRepo;

    #[async_trait]
    impl OrderRepository for PanicsIfCalledRepo {
        async fn create_order(
            &self,
            _user_id: Uuid,
            _order_id: i64,
        ) -> Result<crate::accrual::repository::CreateOrderOutcome> {
            unimplemented!()
        }
        async fn find_order_owner(&self, _order_id: i64) -> Result<Option<Uuid>> {
            unimplemented!()
        }
        async fn list_orders(&self, _user_id: Uuid) -> Result<Vec<crate::domain::order::Order>> {
            unimplemented!()
        }
        async fn list_non_terminal_orders(&self) -> Result<Vec<OrderSnapshot>> {
            unimplemented!()
        }
        async fn update_status(&self, _snapshot: &OrderSnapshot) -> Result<()> {
            panic!("update_status must not be called for a not-registered poll outcome")
        }
        async fn get_balance(&self, _user_id: Uuid) -> Result<crate::domain::balance::UserBalance> {
            unimplemented!()
        }
        async fn create_withdrawal(
            &self,
            _user_id: Uuid,
            _order_id: i64,
            _amount: rust_decimal::Decimal,
        ) -> Result<crate::accrual::repository::WithdrawOutcome> {
            unimplemented!()
        }
        async fn list_withdrawals(&self, _user_id: Uuid) -> Result<Vec<crate::domain::balance::Withdrawal>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn not_registered_retries_unchanged_without_persisting() {
        let client = Arc::new(NotRegisteredClient);
        let repo = Arc::new(PanicsIfCalledRepo);
        let handler = OrderEventHandler::new(client, repo);
        let event = Event::new(OrderSnapshot::new(12345678903, Uuid::nil()));
        let (next, action) = handler.handle(&event).await;
        assert!(matches!(action, PostJobAction::Continue));
        assert_eq!(next.snapshot.status, OrderStatus::New);
        assert_eq!(next.failures(), 0);
    }

    #[tokio::test]
    async fn successful_poll_advances_status_and_preserves_failures() {
        let client = Arc::new(StubClient {
            alive: AtomicBool::new(true),
            status: ProviderStatus::Processed,
        });
        let repo = Arc::new(NoopRepo);
        let handler = OrderEventHandler::new(client, repo);
        let event = Event::new(OrderSnapshot::new(1, Uuid::nil()));
        event.add_failure();
        let (next, _) = handler.handle(&event).await;
        assert_eq!(next.snapshot.status, OrderStatus::Processed);
        assert_eq!(next.failures(), 1);
    }

    #[test]
    fn dlq_discards_past_max_failures() {
        let event = Event::new(OrderSnapshot::new(1, Uuid::nil()));
        for _ in 0..=DEFAULT_MAX_EVENT_FAILURES {
            event.add_failure();
        }
        assert!(!DlqEventHandler::should_retry(&event, DEFAULT_MAX_EVENT_FAILURES));
    }

    #[test]
    fn dlq_retries_within_budget() {
        let event = Event::new(OrderSnapshot::new(1, Uuid::nil()));
        event.add_failure();
        assert!(DlqEventHandler::should_retry(&event, DEFAULT_MAX_EVENT_FAILURES));
    }

    #[tokio::test]
    async fn not_alive_then_recovers_keeps_event_in_new_until_it_does() {
        let client = Arc::new(StubClient {
            alive: AtomicBool::new(false),
            status: ProviderStatus::Processing,
        });
        let repo = Arc::new(NoopRepo);
        let handler = OrderEventHandler::new(client, repo);
        let mut event = Event::new(OrderSnapshot::new(12345678903, Uuid::nil()));

        for _ in 0..3 {
            let (next, action) = handler.handle(&event).await;
            assert!(matches!(action, PostJobAction::Sleep(d) if d == DELAY_CLIENT_NOT_ALIVE));
            assert_eq!(next.snapshot.status, OrderStatus::New);
            assert_eq!(next.failures(), 0);
            event = next;
        }

        handler.client.alive.store(true, Ordering::Relaxed);
        let (recovered, action) = handler.handle(&event).await;
        assert!(matches!(action, PostJobAction::Continue));
        assert_eq!(recovered.snapshot.status, ProviderStatus::Processing.into());
        assert_eq!(recovered.failures(), 0);
    }

    #[tokio::test]
    async fn rate_limited_sleeps_for_retry_after_without_failure_increment() {
        let client = Arc::new(RateLimitedClient {
            retry_after: Duration::from_secs(2),
        });
        let repo = Arc::new(NoopRepo);
        let handler = OrderEventHandler::new(client, repo);
        let event = Event::new(OrderSnapshot::new(12345678903, Uuid::nil()));
        let (next, action) = handler.handle(&event).await;
        assert!(matches!(action, PostJobAction::Sleep(d) if d == Duration::from_secs(2)));
        assert_eq!(next.failures(), 0);
        assert_eq!(next.snapshot.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn persistence_failure_increments_failures_then_recovers() {
        let client = Arc::new(StubClient {
            alive: AtomicBool::new(true),
            status: ProviderStatus::Processing,
        });
        let repo = Arc::new(FlakyOnceRepo {
            failed_once: AtomicBool::new(false),
        });
        let handler = OrderEventHandler::new(client, repo);
        let event = Event::new(OrderSnapshot::new(12345678903, Uuid::nil()));

        let (after_flake, action) = handler.handle(&event).await;
        assert!(matches!(action, PostJobAction::Continue));
        assert_eq!(after_flake.failures(), 1);
        assert_eq!(after_flake.snapshot.status, OrderStatus::New);

        let (after_recovery, _) = handler.handle(&after_flake).await;
        assert_eq!(after_recovery.failures(), 1);
        assert_eq!(after_recovery.snapshot.status, OrderStatus::Processing);
    }
}
