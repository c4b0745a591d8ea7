//! Resilience helpers shared by the background workers.
//!
//! - **Retry**: exponential backoff with jitter, optionally filtered by error kind
//! - **Backoff**: the same schedule as a stateful value for reconnect supervisors
//! - **Timeout**: time limits on broker and database round trips
//!
//! ```rust,no_run
//! use resilience::{with_retry_if, RetryConfig};
//!
//! # async fn publish() -> Result<(), std::io::Error> { Ok(()) }
//! #[tokio::main]
//! async fn main() {
//!     let result = with_retry_if(RetryConfig::default(), publish, |e| {
//!         e.kind() == std::io::ErrorKind::ConnectionReset
//!     })
//!     .await;
//! }
//! ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry_if, Backoff, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, TimeoutError};
