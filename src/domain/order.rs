use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an order as it moves through the accrual pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Uploaded, not yet submitted to the accrual provider.
    New,
    /// Accepted by the provider but not yet in the calculation queue.
    Registered,
    /// Provider is computing the accrual.
    Processing,
    /// Provider rejected the order; terminal, no accrual.
    Invalid,
    /// Provider finished the calculation; terminal, accrual credited.
    Processed,
}

impl OrderStatus {
    /// Terminal statuses never transition further; the core stops polling them.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = crate::error::GophermartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Ok(OrderStatus::New),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(crate::error::GophermartError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

/// Immutable snapshot of an order's accrual state at a point in time.
///
/// State transitions never mutate a snapshot in place; they produce a new
/// one via [`OrderSnapshot::with_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: i64,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

impl OrderSnapshot {
    pub fn new(order_id: i64, user_id: Uuid) -> Self {
        Self {
            order_id,
            user_id,
            status: OrderStatus::New,
            accrual: None,
        }
    }

    /// Produces a successor snapshot with a new status, leaving `self` untouched.
    pub fn with_status(&self, status: OrderStatus, accrual: Option<Decimal>) -> Self {
        Self {
            order_id: self.order_id,
            user_id: self.user_id,
            status,
            accrual,
        }
    }
}

/// A fully persisted order row, as returned by order listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: Uuid,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

const LUHN_MOD: i64 = 2;
const LUHN_THRESHOLD: i64 = 9;

/// Validates an order number as a base-10 integer passing the Luhn checksum.
///
/// `parity` alternates which digits get doubled depending on the id's own
/// parity, matching the original implementation's `id % 2` seed rather than
/// always doubling from a fixed end of the string.
pub fn validate_luhn(order_id: i64) -> bool {
    if order_id <= 0 {
        return false;
    }
    let digits: Vec<i64> = order_id
        .to_string()
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| d as i64)
        .collect();
    if digits.is_empty() {
        return false;
    }
    let parity = order_id % LUHN_MOD;
    let sum: i64 = digits
        .iter()
        .enumerate()
        .map(|(i, &digit)| {
            if (i as i64) % LUHN_MOD == parity {
                let doubled = digit * 2;
                if doubled > LUHN_THRESHOLD {
                    doubled - LUHN_THRESHOLD
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

/// Parses and validates a raw order number string uploaded by a user.
pub fn parse_order_number(raw: &str) -> crate::error::Result<i64> {
    let trimmed = raw.trim();
    let order_id: i64 = trimmed
        .parse()
        .map_err(|_| crate::error::GophermartError::InvalidOrderNumber(trimmed.to_string()))?;
    if !validate_luhn(order_id) {
        return Err(crate::error::GophermartError::InvalidOrderNumber(
            trimmed.to_string(),
        ));
    }
    Ok(order_id)
}
