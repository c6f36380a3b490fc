use std::sync::Arc;

use crate::accrual::AccrualAdapter;
use crate::config::AuthConfig;
use crate::repository::PostgresRepository;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<PostgresRepository>,
    pub adapter: Arc<AccrualAdapter>,
    pub auth: Arc<AuthConfig>,
}
