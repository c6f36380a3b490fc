//! Client interface to the external accrual provider and its HTTP
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::warn;

use crate::domain::order::OrderStatus;
use crate::error::{GophermartError, Result};

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(3);

/// Provider response body for `GET /api/orders/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderOrderStatus {
    pub order: String,
    pub status: ProviderStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

impl From<ProviderStatus> for OrderStatus {
    fn from(value: ProviderStatus) -> Self {
        match value {
            ProviderStatus::Registered => OrderStatus::Registered,
            ProviderStatus::Invalid => OrderStatus::Invalid,
            ProviderStatus::Processing => OrderStatus::Processing,
            ProviderStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Outcome of a single poll against the provider.
pub enum PollOutcome {
    /// The provider has a status for this order.
    Status(ProviderOrderStatus),
    /// The order has not been registered with the provider yet (204).
    NotRegistered,
}

/// Narrow interface the core polls for per-order accrual status.
///
/// Implementations are expected to own their own retry/backoff concerns
/// internal to a single call; the core decides whether and how long to wait
/// between calls based on the classification the call returns.
#[async_trait]
pub trait AccrualClient: Send + Sync {
    /// Cheap liveness probe, independent of any specific order.
    async fn is_alive(&self) -> bool;

    /// Fetches the current status for `order_id`.
    async fn get_order_status(&self, order_id: i64) -> Result<PollOutcome>;
}

/// HTTP implementation of [`AccrualClient`] against the accrual provider's
/// documented contract: `GET /api/orders/{id}` returning 200/204/429/5xx.
#[derive(Clone)]
pub struct HttpAccrualClient {
    http: Client,
    base_url: String,
    liveness_host_port: String,
    liveness_timeout: Duration,
}

impl HttpAccrualClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let liveness_host_port = strip_scheme(&base_url);
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("gophermart-accrual-client/0.1")
            .build()
            .map_err(|e| GophermartError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            liveness_host_port,
            liveness_timeout: timeout,
        })
    }
}

fn strip_scheme(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_string()
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn is_alive(&self) -> bool {
        tokio::time::timeout(
            self.liveness_timeout,
            TcpStream::connect(&self.liveness_host_port),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
    }

    async fn get_order_status(&self, order_id: i64) -> Result<PollOutcome> {
        let url = format!("{}/api/orders/{}", self.base_url, order_id);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: ProviderOrderStatus = response.json().await?;
                Ok(PollOutcome::Status(body))
            }
            StatusCode::NO_CONTENT => Ok(PollOutcome::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                Err(GophermartError::RateLimited(retry_after))
            }
            status if status.is_server_error() => {
                warn!(%status, order_id, "accrual provider returned server error");
                Err(GophermartError::ProviderUnavailable)
            }
            status => Err(GophermartError::ProviderError(format!(
                "unexpected status {status} from accrual provider"
            ))),
        }
    }
}
