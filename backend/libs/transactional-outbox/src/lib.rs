//! # Transactional Outbox
//!
//! Reliable event publishing for services that change state and announce it.
//!
//! 1. Business writes and the event row are committed in the same transaction through
//!    [`OutboxWriter::append`].
//! 2. [`OutboxPublisher`] drains `RECEIVED` rows in the background, publishes each one to the
//!    broker and marks it `SENT`, or `FAILED` when the broker rejects it.
//! 3. Consumers de-duplicate on `(id, origin)`; delivery is at-least-once.
//!
//! Events are identified by `(id, origin)`. Appending the same pair twice is reported as
//! [`OutboxError::DuplicateEvent`] and leaves the caller's transaction usable, so the caller
//! can treat a replayed request as success and still commit.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use transactional_outbox::{OutboxEvent, OutboxWriter};
//! use sqlx::PgPool;
//!
//! async fn register(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!
//!     // ... business writes on &mut *tx ...
//!
//!     let event = OutboxEvent::new(
//!         "E1",
//!         "user.created",
//!         "user.created",
//!         "auth-security-svc",
//!         serde_json::json!({ "identity": 42 }),
//!     );
//!     match OutboxWriter::new().append(&mut tx, &event).await {
//!         Ok(()) => {}
//!         Err(e) if e.is_duplicate() => {}
//!         Err(e) => return Err(e.into()),
//!     }
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod broker;
mod error;
pub mod metrics;
mod publisher;
mod store;

pub use broker::{AmqpBroker, AmqpEventPublisher, QueueBinding, Topology};
pub use error::{OutboxError, OutboxResult};
pub use publisher::{DrainReport, EventPublisher, OutboxPublisher, PublisherConfig};
pub use store::{OutboxStore, OutboxWriter, SqlxOutboxRepository};

/// Longest accepted event id / origin.
pub const MAX_KEY_LEN: usize = 255;

/// The event envelope, exactly as it travels on the wire.
///
/// ```json
/// {"id":"E1","type":"user.created","routingKey":"user.created",
///  "origin":"svcA","timestamp":"2024-05-01T12:00:00Z","payload":{}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Idempotency key, unique per origin
    pub id: String,

    /// Event type (e.g. "user.created")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Broker routing key
    #[serde(rename = "routingKey")]
    pub routing_key: String,

    /// Service that produced the event
    pub origin: String,

    /// When the event was produced (RFC3339)
    pub timestamp: DateTime<Utc>,

    /// Opaque JSON body
    pub payload: serde_json::Value,
}

impl OutboxEvent {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        routing_key: impl Into<String>,
        origin: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            routing_key: routing_key.into(),
            origin: origin.into(),
            // Postgres keeps microseconds; trimming here keeps stored and in-memory equal.
            timestamp: Utc::now().trunc_subsecs(6),
            payload,
        }
    }

    /// Build an event from any serializable payload.
    pub fn with_payload<T: Serialize>(
        id: impl Into<String>,
        event_type: impl Into<String>,
        routing_key: impl Into<String>,
        origin: impl Into<String>,
        payload: &T,
    ) -> OutboxResult<Self> {
        Ok(Self::new(
            id,
            event_type,
            routing_key,
            origin,
            serde_json::to_value(payload)?,
        ))
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> OutboxResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Check the fields the store and the broker rely on.
    pub fn validate(&self) -> OutboxResult<()> {
        validate_key("id", &self.id)?;
        validate_key("origin", &self.origin)?;
        if self.routing_key.trim().is_empty() {
            return Err(OutboxError::InvalidEvent("routing key is empty".into()));
        }
        if self.event_type.trim().is_empty() {
            return Err(OutboxError::InvalidEvent("event type is empty".into()));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> OutboxResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> OutboxResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

fn validate_key(field: &str, value: &str) -> OutboxResult<()> {
    if value.trim().is_empty() {
        return Err(OutboxError::InvalidEvent(format!("{field} is empty")));
    }
    if value.len() > MAX_KEY_LEN {
        return Err(OutboxError::InvalidEvent(format!(
            "{field} exceeds {MAX_KEY_LEN} characters"
        )));
    }
    Ok(())
}

/// Delivery status of a stored event. `RECEIVED -> SENT | FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Received,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Received => "RECEIVED",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(OutboxStatus::Received),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::InvalidEvent(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// An event as read back from the outbox table.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: OutboxEvent,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
}
