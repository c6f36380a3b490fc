//! The accrual integration subsystem: polls an external accrual provider per
//! order until terminal, then persists the result so balances can be
//! credited. HTTP routing, auth, and password hashing live outside this
//! module and consume it through [`AccrualClient`] and [`OrderRepository`].

pub mod adapter;
pub mod client;
pub mod event;
pub mod handler;
pub mod queue;
pub mod queue_manager;
pub mod repository;
pub mod scheduler;
pub mod shutdown;

pub use adapter::{AccrualAdapter, AdapterConfig};
pub use client::{AccrualClient, HttpAccrualClient, PollOutcome, ProviderOrderStatus, ProviderStatus};
pub use event::{Event, EventStats, EventStatsSnapshot, EventType};
pub use repository::{CreateOrderOutcome, OrderRepository, WithdrawOutcome};
