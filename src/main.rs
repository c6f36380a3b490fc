use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gophermart::accrual::repository::OrderRepository;
use gophermart::accrual::{AccrualAdapter, AdapterConfig, HttpAccrualClient};
use gophermart::api::{build_router, AppState};
use gophermart::config::AppConfig;
use gophermart::domain::order::OrderSnapshot;
use gophermart::repository::PostgresRepository;
use gophermart::{GophermartError, Result};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = AppConfig::load().map_err(GophermartError::Config)?;
    info!(port = config.api_port, "starting gophermart");

    let repository = Arc::new(PostgresRepository::new(&config.database.url, config.database.max_connections).await?);
    repository.migrate().await?;

    let client = Arc::new(HttpAccrualClient::new(
        config.accrual.address.clone(),
        config.accrual.http_timeout(),
    )?);

    let adapter = Arc::new(AccrualAdapter::new(
        AdapterConfig {
            new_queue_capacity: config.accrual.new_queue_capacity,
            in_progress_queue_capacity: config.accrual.in_progress_queue_capacity,
            dead_letter_queue_capacity: config.accrual.dead_letter_queue_capacity,
            worker_concurrency: config.accrual.worker_concurrency,
            max_event_failures: config.accrual.max_event_failures,
            job_delay_new: config.accrual.job_delay_new(),
            job_delay_in_progress: config.accrual.job_delay_in_progress(),
            job_delay_dead_letter: config.accrual.job_delay_dead_letter(),
        },
        client,
        repository.clone(),
    ));

    if config.accrual.reconcile_on_startup {
        reconcile_on_startup(&repository, &adapter).await?;
    }

    adapter.start().await;

    let state = AppState {
        repository: repository.clone(),
        adapter: adapter.clone(),
        auth: Arc::new(config.auth.clone()),
    };
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port)).await?;
    info!(port = config.api_port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    adapter.drain(config.accrual.drain_deadline()).await;
    Ok(())
}

/// Re-submits every non-terminal order into the core so a restart loses at
/// most one missed poll cycle per order, never an order stuck forever.
async fn reconcile_on_startup(
    repository: &Arc<PostgresRepository>,
    adapter: &Arc<AccrualAdapter>,
) -> Result<()> {
    let pending: Vec<OrderSnapshot> = repository.list_non_terminal_orders().await?;
    if pending.is_empty() {
        return Ok(());
    }
    info!(count = pending.len(), "reconciling non-terminal orders on startup");
    for snapshot in pending {
        if !adapter.submit(snapshot).await {
            warn!("startup reconciliation event lost: queue saturated");
        }
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gophermart=debug,sqlx=warn"));

    let log_dir = std::env::var("GOPHERMART_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/gophermart".to_string());

    // `tracing_appender::rolling::daily` panics if it can't create the
    // initial log file, so writability is preflighted here.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".gophermart_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&test_path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(&log_dir, "gophermart.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("warning: could not write to log directory {log_dir} ({e}), file logging disabled");
                None
            }
        }
    } else {
        eprintln!("warning: could not create log directory {log_dir}, file logging disabled");
        None
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        eprintln!("logging to: {log_dir}/gophermart.log");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
