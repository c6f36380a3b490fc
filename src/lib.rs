pub mod accrual;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod repository;

pub use accrual::{AccrualAdapter, AdapterConfig};
pub use config::AppConfig;
pub use error::{GophermartError, Result};
pub use repository::PostgresRepository;
