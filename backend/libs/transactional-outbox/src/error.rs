//! Error types for the transactional outbox library.

use thiserror::Error;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An event with the same (id, origin) was already appended
    #[error("Duplicate event: id={id} origin={origin}")]
    DuplicateEvent { id: String, origin: String },

    /// Event rejected before reaching the store
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Event not found in outbox
    #[error("Event not found: id={id} origin={origin}")]
    EventNotFound { id: String, origin: String },

    /// The broker received the event but did not confirm it
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// No usable broker connection; nothing was sent
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// AMQP protocol or channel error
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    /// Whether the same operation may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            OutboxError::Database(e) => db_pool::classify(e).is_transient(),
            OutboxError::BrokerUnavailable(_) | OutboxError::Broker(_) => true,
            _ => false,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, OutboxError::DuplicateEvent { .. })
    }
}
