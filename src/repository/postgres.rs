//! Postgres-backed implementation of [`OrderRepository`].
//!
//! Dual-write contract for the `Processed` terminal status: the order row
//! update and the accrual ledger insert happen in one transaction. Every
//! other status is a plain single-row update. Withdrawals are serialized
//! per user via a Postgres advisory lock keyed on a digest of the user id,
//! so concurrent withdrawals for the same user never overdraw the balance
//! without blocking withdrawals for any other user.

use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::accrual::repository::{CreateOrderOutcome, OrderRepository, WithdrawOutcome};
use crate::domain::balance::{UserBalance, Withdrawal};
use crate::domain::order::{Order, OrderSnapshot, OrderStatus};
use crate::error::Result;

/// PostgreSQL-backed storage for orders, balances, and withdrawals.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("connected to postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Maps a unique-key violation on the orders table to the distinct
    /// "already uploaded" outcome, any other error propagates unchanged.
    #[instrument(skip(self))]
    async fn insert_order(&self, user_id: Uuid, order_id: i64) -> Result<CreateOrderOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status)
            VALUES ($1, $2, 'NEW')
            ON CONFLICT (id) DO NOTHING
            RETURNING id, user_id, status, accrual, uploaded_at
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(CreateOrderOutcome::Created(row_to_order(&row)?));
        }

        // Row already existed; fetch it to report who uploaded it.
        let existing = sqlx::query(
            r#"SELECT id, user_id, status, accrual, uploaded_at FROM orders WHERE id = $1"#,
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;
        let order = row_to_order(&existing)?;
        if order.user_id == user_id {
            Ok(CreateOrderOutcome::AlreadyUploadedBySameUser(order))
        } else {
            Ok(CreateOrderOutcome::AlreadyUploadedByOtherUser(order))
        }
    }
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order> {
    let status_str: String = row.get("status");
    Ok(Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        status: status_str.parse()?,
        accrual: row.get("accrual"),
        uploaded_at: row.get("uploaded_at"),
    })
}

/// Stable 64-bit digest of a user id, used as a Postgres advisory lock key.
fn lock_id(user_id: Uuid) -> i64 {
    let bytes = user_id.as_bytes();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    i64::from_be_bytes(buf)
}

#[async_trait::async_trait]
impl OrderRepository for PostgresRepository {
    #[instrument(skip(self))]
    async fn create_order(&self, user_id: Uuid, order_id: i64) -> Result<CreateOrderOutcome> {
        self.insert_order(user_id, order_id).await
    }

    async fn find_order_owner(&self, order_id: i64) -> Result<Option<Uuid>> {
        let row = sqlx::query("SELECT user_id FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("user_id")))
    }

    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, accrual, uploaded_at
            FROM orders WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn list_non_terminal_orders(&self) -> Result<Vec<OrderSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, accrual FROM orders
            WHERE status NOT IN ('INVALID', 'PROCESSED')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let status_str: String = row.get("status");
                let status: OrderStatus = status_str.parse()?;
                Ok(OrderSnapshot {
                    order_id: row.get("id"),
                    user_id: row.get("user_id"),
                    status,
                    accrual: row.get("accrual"),
                })
            })
            .collect()
    }

    /// `PROCESSED` and `INVALID` are final: the `WHERE` clause on both
    /// branches refuses to overwrite an order already in a terminal status,
    /// so a late-arriving, out-of-order event can never resurrect a
    /// finished order. The `ON CONFLICT DO NOTHING` on the ledger insert is
    /// a second idempotency backstop (alongside the unique index on
    /// `accrual_ledger.order_id`) against a duplicate in-flight event for
    /// the same order reaching `PROCESSED` twice.
    #[instrument(skip(self))]
    async fn update_status(&self, snapshot: &OrderSnapshot) -> Result<()> {
        if snapshot.status == OrderStatus::Processed {
            let mut tx = self.pool.begin().await?;
            let updated = sqlx::query(
                r#"
                UPDATE orders SET status = $1, accrual = $2
                WHERE id = $3 AND status NOT IN ('PROCESSED', 'INVALID')
                RETURNING id
                "#,
            )
            .bind(snapshot.status.as_str())
            .bind(snapshot.accrual)
            .bind(snapshot.order_id)
            .fetch_optional(&mut *tx)
            .await?;

            if updated.is_some() {
                sqlx::query(
                    r#"
                    INSERT INTO accrual_ledger (order_id, user_id, amount)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (order_id) DO NOTHING
                    "#,
                )
                .bind(snapshot.order_id)
                .bind(snapshot.user_id)
                .bind(snapshot.accrual.unwrap_or(Decimal::ZERO))
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        } else {
            sqlx::query(
                r#"
                UPDATE orders SET status = $1, accrual = $2
                WHERE id = $3 AND status NOT IN ('PROCESSED', 'INVALID')
                "#,
            )
            .bind(snapshot.status.as_str())
            .bind(snapshot.accrual)
            .bind(snapshot.order_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn get_balance(&self, user_id: Uuid) -> Result<UserBalance> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE((SELECT SUM(amount) FROM accrual_ledger WHERE user_id = $1), 0) AS accrued,
                COALESCE((SELECT SUM(sum) FROM withdrawals WHERE user_id = $1), 0) AS withdrawn
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        let accrued: Decimal = row.get("accrued");
        let withdrawn: Decimal = row.get("withdrawn");
        Ok(UserBalance {
            user_id,
            current: accrued - withdrawn,
            withdrawn,
        })
    }

    #[instrument(skip(self))]
    async fn create_withdrawal(
        &self,
        user_id: Uuid,
        order_id: i64,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent withdrawals for the same user without
        // blocking withdrawals for any other user.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(lock_id(user_id))
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE((SELECT SUM(amount) FROM accrual_ledger WHERE user_id = $1), 0) AS accrued,
                COALESCE((SELECT SUM(sum) FROM withdrawals WHERE user_id = $1), 0) AS withdrawn
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let accrued: Decimal = row.get("accrued");
        let withdrawn: Decimal = row.get("withdrawn");
        if accrued - withdrawn - amount < Decimal::ZERO {
            return Ok(WithdrawOutcome::InsufficientFunds);
        }

        let order_str = order_id.to_string();
        let inserted = sqlx::query(
            r#"
            INSERT INTO withdrawals (user_id, order_id, sum)
            VALUES ($1, $2, $3)
            RETURNING processed_at
            "#,
        )
        .bind(user_id)
        .bind(order_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(WithdrawOutcome::Recorded(Withdrawal {
            order: order_str,
            sum: amount,
            processed_at: inserted.get("processed_at"),
        }))
    }

    async fn list_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, sum, processed_at FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let order_id: i64 = row.get("order_id");
                Withdrawal {
                    order: order_id.to_string(),
                    sum: row.get("sum"),
                    processed_at: row.get("processed_at"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_id_is_deterministic_for_same_user() {
        let user = Uuid::new_v4();
        assert_eq!(lock_id(user), lock_id(user));
    }

    #[test]
    fn lock_id_differs_across_users() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(lock_id(a), lock_id(b));
    }
}
