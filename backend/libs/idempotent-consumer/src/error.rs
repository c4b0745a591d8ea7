//! Error types for idempotent consumer library

use thiserror::Error;

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur while consuming events
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Broker channel or consumer failure
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Event ID validation failed (empty, too long)
    #[error("Invalid event ID: {0}")]
    InvalidEventId(String),

    /// Unusable configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IdempotencyError {
    /// Check if error is transient (should retry)
    pub fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Database(e) => db_pool::classify(e).is_transient(),
            IdempotencyError::Broker(_) => true,
            _ => false,
        }
    }
}
