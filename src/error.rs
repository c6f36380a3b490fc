use thiserror::Error;

/// Main error type for the gophermart service.
#[derive(Error, Debug)]
pub enum GophermartError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Accrual provider rate limited, retry after {0:?}")]
    RateLimited(std::time::Duration),

    #[error("Accrual provider unavailable")]
    ProviderUnavailable,

    #[error("Accrual provider error: {0}")]
    ProviderError(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Core queue/event errors
    #[error("Queue is closed")]
    QueueClosed,

    #[error("Queue is full")]
    QueueFull,

    // Persistence errors surfaced from the repository
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Order {0} already uploaded by this user")]
    OrderAlreadyUploaded(i64),

    #[error("Order {0} already uploaded by another user")]
    OrderOwnedByOther(i64),

    #[error("Insufficient balance")]
    InsufficientBalance,

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    // Auth errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Login already taken: {0}")]
    LoginTaken(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<argon2::password_hash::Error> for GophermartError {
    fn from(err: argon2::password_hash::Error) -> Self {
        GophermartError::PasswordHash(err.to_string())
    }
}

/// Result type alias for GophermartError
pub type Result<T> = std::result::Result<T, GophermartError>;
