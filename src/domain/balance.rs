use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived balance for a user: accrued minus withdrawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalance {
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl UserBalance {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            current: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        }
    }
}

/// A single recorded withdrawal against an order number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_balance_starts_at_zero() {
        let balance = UserBalance::new(Uuid::nil());
        assert_eq!(balance.current, Decimal::ZERO);
        assert_eq!(balance.withdrawn, Decimal::ZERO);
    }
}
