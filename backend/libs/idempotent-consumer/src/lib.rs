//! # Idempotent Event Consumer
//!
//! Consumes outbox envelopes from an AMQP queue and runs each event at most once per
//! `(event_id, origin)`, using PostgreSQL to remember what has been handled.
//!
//! Delivery from the outbox is at-least-once: a publisher that crashes between the broker
//! confirm and marking the row `SENT` sends the event again, and operators can requeue
//! failed events by hand. The guard turns those replays into no-ops.
//!
//! ## Architecture
//!
//! ```text
//! Queue → EventConsumer → EventRouter → IdempotentHandler → EventHandler
//!                                              ↓
//!                                        (Check/Store)
//!                                              ↓
//!                                         PostgreSQL
//!                                   (processed_events table)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use idempotent_consumer::{ConsumerConfig, EventConsumer, EventRouter, IdempotencyGuard, IdempotentHandler};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let guard = Arc::new(IdempotencyGuard::new(pool, Duration::from_secs(7 * 86400)));
//! let router = EventRouter::new()
//!     .register("user.created", Arc::new(IdempotentHandler::new(handler, guard.clone())));
//!
//! let consumer = EventConsumer::new(ConsumerConfig::default(), Arc::new(router));
//! consumer.run(&channel, "user_created_q", shutdown_rx).await?;
//! ```
//!
//! ## Failure handling
//!
//! - Undecodable or invalid envelopes are nacked without requeue and land in the queue's
//!   dead letter queue.
//! - Envelopes whose routing key has no handler are acked and dropped.
//! - [`HandlerError::Permanent`] dead-letters the message.
//! - [`HandlerError::Transient`] requeues it after a short pause.
//!
//! ## Retention
//!
//! Processed keys are deleted after the guard's retention window (7 days by default in
//! the service); run [`IdempotencyGuard::spawn_cleanup`] to enforce it.

mod consumer;
mod error;
mod guard;
mod router;

pub use consumer::{wait_for_shutdown, ConsumerConfig, ConsumerExit, EventConsumer};
pub use error::{IdempotencyError, IdempotencyResult};
pub use guard::{IdempotencyGuard, ProcessedLog, MAX_KEY_LEN};
pub use router::{Disposition, EventHandler, EventRouter, HandlerError, IdempotentHandler};
