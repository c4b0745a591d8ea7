use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use transactional_outbox::OutboxEvent;

use crate::ProcessedLog;

/// Failure reported by an [`EventHandler`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Redelivering the same message cannot succeed (bad payload, business rule).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Infrastructure trouble; the message is worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Nack without requeue; the queue dead-letters it.
    Reject { reason: String },
    /// Nack with requeue.
    Requeue { reason: String },
}

impl From<HandlerError> for Disposition {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Permanent(reason) => Disposition::Reject { reason },
            HandlerError::Transient(reason) => Disposition::Requeue { reason },
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError>;
}

/// Dispatches envelopes to handlers by routing key.
#[derive(Default, Clone)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `routing_key`, replacing any previous one.
    pub fn register(
        mut self,
        routing_key: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.handlers.insert(routing_key.into(), handler);
        self
    }

    pub fn routing_keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Decode a message body and dispatch it.
    ///
    /// Undecodable bodies are rejected; envelopes with no registered handler are
    /// acknowledged and dropped.
    pub async fn dispatch(&self, body: &[u8]) -> Disposition {
        let event = match OutboxEvent::from_bytes(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Undecodable message body");
                return Disposition::Reject {
                    reason: format!("undecodable envelope: {}", e),
                };
            }
        };

        if let Err(e) = event.validate() {
            warn!(event_id = %event.id, error = %e, "Invalid envelope");
            return Disposition::Reject {
                reason: e.to_string(),
            };
        }

        self.dispatch_event(&event).await
    }

    pub async fn dispatch_event(&self, event: &OutboxEvent) -> Disposition {
        let Some(handler) = self.handlers.get(&event.routing_key) else {
            warn!(
                event_id = %event.id,
                routing_key = %event.routing_key,
                "No handler for routing key, dropping"
            );
            return Disposition::Ack;
        };

        match handler.handle(event).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    origin = %event.origin,
                    routing_key = %event.routing_key,
                    error = %e,
                    "Event handler failed"
                );
                e.into()
            }
        }
    }
}

/// Runs the wrapped handler at most once per `(event_id, origin)`.
///
/// The key is recorded only after the handler succeeds, so a crash in between leads to
/// one more delivery. Handlers must tolerate that.
pub struct IdempotentHandler<H, L> {
    inner: H,
    log: Arc<L>,
}

impl<H, L> IdempotentHandler<H, L>
where
    H: EventHandler,
    L: ProcessedLog,
{
    pub fn new(inner: H, log: Arc<L>) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl<H, L> EventHandler for IdempotentHandler<H, L>
where
    H: EventHandler,
    L: ProcessedLog,
{
    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        let seen = self
            .log
            .is_processed(&event.id, &event.origin)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    HandlerError::Transient(e.to_string())
                } else {
                    HandlerError::Permanent(e.to_string())
                }
            })?;

        if seen {
            debug!(event_id = %event.id, origin = %event.origin, "Skipping duplicate event");
            return Ok(());
        }

        self.inner.handle(event).await?;

        let metadata = json!({
            "type": event.event_type,
            "routingKey": event.routing_key,
        });
        if let Err(e) = self
            .log
            .mark_processed(&event.id, &event.origin, Some(metadata))
            .await
        {
            // already applied; a redelivery runs the handler again
            warn!(event_id = %event.id, error = %e, "Failed to record processed event");
        }

        Ok(())
    }
}
