//! Public façade over the accrual integration core: `submit`, `start`,
//! `drain`, `stats`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::order::OrderSnapshot;

use super::client::AccrualClient;
use super::event::{Event, EventStatsSnapshot, EventType};
use super::handler::{DlqEventHandler, OrderEventHandler, PostJobAction, DEFAULT_MAX_EVENT_FAILURES};
use super::queue_manager::{QueueManager, RouteOutcome};
use super::repository::OrderRepository;
use super::scheduler::{EventJob, Scheduler};
use super::shutdown::ShutdownController;

/// Default tunables, mirroring the original implementation's constants.
pub struct AdapterConfig {
    pub new_queue_capacity: usize,
    pub in_progress_queue_capacity: usize,
    pub dead_letter_queue_capacity: usize,
    pub worker_concurrency: usize,
    pub max_event_failures: u32,
    pub job_delay_new: Duration,
    pub job_delay_in_progress: Duration,
    pub job_delay_dead_letter: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            new_queue_capacity: 1_000,
            in_progress_queue_capacity: 1_000,
            dead_letter_queue_capacity: 1_000_000,
            worker_concurrency: 2,
            max_event_failures: DEFAULT_MAX_EVENT_FAILURES,
            job_delay_new: Duration::from_millis(100),
            job_delay_in_progress: Duration::from_secs(1),
            job_delay_dead_letter: Duration::from_secs(1),
        }
    }
}

async fn log_route_outcome(qmgr: &QueueManager, event: Event, context: &str) {
    match qmgr.route(event).await {
        RouteOutcome::Lost => warn!(context, "event lost: target queue and dead-letter queue both full"),
        RouteOutcome::DeadLettered => warn!(context, "event missed: routed to dead-letter queue"),
        RouteOutcome::Queued | RouteOutcome::Terminal => {}
    }
}

struct OrderHandlerJob<C, R> {
    handler: Arc<OrderEventHandler<C, R>>,
    qmgr: Arc<QueueManager>,
}

#[async_trait]
impl<C, R> EventJob for OrderHandlerJob<C, R>
where
    C: AccrualClient + 'static,
    R: OrderRepository + 'static,
{
    async fn run(&self, event: Event, _worker_id: usize) {
        let (next_event, action) = self.handler.handle(&event).await;
        log_route_outcome(&self.qmgr, next_event, "order_handler").await;
        if let PostJobAction::Sleep(delay) = action {
            tokio::time::sleep(delay).await;
        }
    }
}

struct DlqJob {
    qmgr: Arc<QueueManager>,
    max_event_failures: u32,
}

#[async_trait]
impl EventJob for DlqJob {
    async fn run(&self, event: Event, _worker_id: usize) {
        if !DlqEventHandler::should_retry(&event, self.max_event_failures) {
            return;
        }
        log_route_outcome(&self.qmgr, event, "dlq_handler").await;
    }
}

/// Owns the three internal queues, their schedulers, and the handlers that
/// process events popped from them.
pub struct AccrualAdapter {
    qmgr: Arc<QueueManager>,
    shutdown: ShutdownController,
    schedulers: Vec<Arc<Scheduler>>,
    tasks: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AccrualAdapter {
    pub fn new<C, R>(config: AdapterConfig, client: Arc<C>, repository: Arc<R>) -> Self
    where
        C: AccrualClient + 'static,
        R: OrderRepository + 'static,
    {
        let qmgr = Arc::new(QueueManager::new(
            config.new_queue_capacity,
            config.in_progress_queue_capacity,
            config.dead_letter_queue_capacity,
        ));
        let handler = Arc::new(OrderEventHandler::new(client, repository));

        let order_job: Arc<dyn EventJob> = Arc::new(OrderHandlerJob {
            handler: handler.clone(),
            qmgr: qmgr.clone(),
        });
        let dlq_job: Arc<dyn EventJob> = Arc::new(DlqJob {
            qmgr: qmgr.clone(),
            max_event_failures: config.max_event_failures,
        });

        let schedulers = vec![
            Arc::new(Scheduler::new(
                qmgr.queue(EventType::New).clone(),
                order_job.clone(),
                config.job_delay_new,
                config.worker_concurrency,
                "new",
            )),
            Arc::new(Scheduler::new(
                qmgr.queue(EventType::InProgress).clone(),
                order_job,
                config.job_delay_in_progress,
                config.worker_concurrency,
                "in_progress",
            )),
            Arc::new(Scheduler::new(
                qmgr.queue(EventType::DeadLetter).clone(),
                dlq_job,
                config.job_delay_dead_letter,
                config.worker_concurrency,
                "dead_letter",
            )),
        ];

        Self {
            qmgr,
            shutdown: ShutdownController::new(),
            schedulers,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Submits a freshly uploaded order's NEW snapshot into the pipeline.
    pub async fn submit(&self, snapshot: OrderSnapshot) -> bool {
        self.qmgr.submit_order(snapshot).await
    }

    /// Spawns all three scheduler loops as background tasks.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        for scheduler in &self.schedulers {
            let scheduler = scheduler.clone();
            let token = self.shutdown.token();
            tasks.push(tokio::spawn(async move {
                scheduler.run(token).await;
            }));
        }
        info!("accrual adapter started");
    }

    /// Requests shutdown and waits up to `deadline` for in-flight batches to
    /// finish, logging final stats regardless of whether the deadline was
    /// reached.
    pub async fn drain(&self, deadline: Duration) {
        self.shutdown.trigger();
        let mut tasks = self.tasks.lock().await;
        let handles = std::mem::take(&mut *tasks);
        let join_all = join_all_tasks(handles);
        match tokio::time::timeout(deadline, join_all).await {
            Ok(()) => info!("accrual adapter drained cleanly"),
            Err(_) => warn!(?deadline, "accrual adapter drain deadline exceeded"),
        }
        self.log_stats();
    }

    pub fn stats(&self) -> EventStatsSnapshot {
        self.qmgr.stats()
    }

    fn log_stats(&self) {
        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            processed = stats.processed,
            lost = stats.lost,
            failures = stats.failures,
            size_new = stats.size_new,
            size_in_progress = stats.size_in_progress,
            size_dlq = stats.size_dlq,
            "accrual adapter stats"
        );
    }
}

async fn join_all_tasks(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::client::{PollOutcome, ProviderOrderStatus, ProviderStatus};
    use crate::accrual::repository::{CreateOrderOutcome, WithdrawOutcome};
    use crate::domain::balance::{UserBalance, Withdrawal};
    use crate::domain::order::{Order, OrderStatus};
    use crate::error::Result;
    use uuid::Uuid;

    struct AlwaysAliveClient;

    #[async_trait]
    impl AccrualClient for AlwaysAliveClient {
        async fn is_alive(&self) -> bool {
            true
        }
        async fn get_order_status(&self, _order_id: i64) -> Result<PollOutcome> {
            Ok(PollOutcome::Status(ProviderOrderStatus {
                order: "1".into(),
                status: ProviderStatus::Processed,
                accrual: Some(rust_decimal::Decimal::new(100, 2)),
            }))
        }
    }

    struct NoopRepo;

    #[async_trait]
    impl OrderRepository for NoopRepo {
        async fn create_order(&self, _user_id: Uuid, _order_id: i64) -> Result<CreateOrderOutcome> {
            unimplemented!()
        }
        async fn find_order_owner(&self, _order_id: i64) -> Result<Option<Uuid>> {
            unimplemented!()
        }
        async fn list_orders(&self, _user_id: Uuid) -> Result<Vec<Order>> {
            unimplemented!()
        }
        async fn list_non_terminal_orders(&self) -> Result<Vec<OrderSnapshot>> {
            Ok(vec![])
        }
        async fn update_status(&self, _snapshot: &OrderSnapshot) -> Result<()> {
            Ok(())
        }
        async fn get_balance(&self, _user_id: Uuid) -> Result<UserBalance> {
            unimplemented!()
        }
        async fn create_withdrawal(
            &self,
            _user_id: Uuid,
            _order_id: i64,
            _amount: rust_decimal::Decimal,
        ) -> Result<WithdrawOutcome> {
            unimplemented!()
        }
        async fn list_withdrawals(&self, _user_id: Uuid) -> Result<Vec<Withdrawal>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn submit_then_start_processes_to_terminal() {
        let adapter = AccrualAdapter::new(
            AdapterConfig {
                job_delay_new: Duration::from_millis(5),
                ..AdapterConfig::default()
            },
            Arc::new(AlwaysAliveClient),
            Arc::new(NoopRepo),
        );
        adapter
            .submit(OrderSnapshot::new(12345678903, Uuid::nil()))
            .await;
        adapter.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        adapter.drain(Duration::from_secs(1)).await;
        assert_eq!(adapter.stats().processed, 1);
    }
}
