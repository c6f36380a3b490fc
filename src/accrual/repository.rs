//! Persistence contract the core consumes. Concrete implementations live
//! outside the core (see `crate::repository::postgres`); tests substitute a
//! mock generated by `mockall`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::balance::{UserBalance, Withdrawal};
use crate::domain::order::{Order, OrderSnapshot};
use crate::error::Result;

/// Outcome of attempting to record a new order upload.
pub enum CreateOrderOutcome {
    /// Order did not exist before; now created with status NEW.
    Created(Order),
    /// Order already existed, uploaded by the same user.
    AlreadyUploadedBySameUser(Order),
    /// Order already existed, uploaded by a different user.
    AlreadyUploadedByOtherUser(Order),
}

/// Outcome of attempting to debit a user's balance for a withdrawal.
pub enum WithdrawOutcome {
    Recorded(Withdrawal),
    InsufficientFunds,
    InvalidOrder,
}

/// Narrow persistence surface the accrual core and the outer HTTP layer
/// depend on. Implementations own connection pooling, retries on transient
/// failures, and classification of unique-key violations as permanent
/// errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Records a newly uploaded order number for a user.
    async fn create_order(&self, user_id: Uuid, order_id: i64) -> Result<CreateOrderOutcome>;

    /// Looks up the current owner of an order number, if any.
    async fn find_order_owner(&self, order_id: i64) -> Result<Option<Uuid>>;

    /// Lists all orders belonging to a user, most recently uploaded first.
    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>>;

    /// Lists all orders not yet in a terminal status, across all users.
    /// Used for the startup reconciliation sweep.
    async fn list_non_terminal_orders(&self) -> Result<Vec<OrderSnapshot>>;

    /// Persists a status transition. For `Processed`, this atomically
    /// updates the order row and inserts the corresponding ledger credit in
    /// one transaction; for other statuses it is a plain single-row update.
    async fn update_status(&self, snapshot: &OrderSnapshot) -> Result<()>;

    /// Computes a user's current balance from accruals minus withdrawals.
    async fn get_balance(&self, user_id: Uuid) -> Result<UserBalance>;

    /// Records a withdrawal against an order number, serialized per user via
    /// an advisory lock so concurrent withdrawals for the same user never
    /// overdraw the balance.
    async fn create_withdrawal(
        &self,
        user_id: Uuid,
        order_id: i64,
        amount: Decimal,
    ) -> Result<WithdrawOutcome>;

    /// Lists a user's withdrawal history, most recent first.
    async fn list_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>>;
}
