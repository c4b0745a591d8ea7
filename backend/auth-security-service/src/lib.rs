/// Auth Security Service Library
///
/// Credential and session lifecycle engine: layered revocation checks, TOTP challenges,
/// single-active token pairs with history, and user registration published through the
/// transactional outbox.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `consumers`: Broker event handlers and their reconnect supervisor
/// - `db`: Store traits and PostgreSQL implementations
/// - `error`: Error types and the public error mapping
/// - `models`: Data models
/// - `security`: Password hashing, TOTP, credential validation
/// - `services`: Sessions, tokens, MFA, admin, registration, recovery
pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod models;
pub mod security;
pub mod services;

// Re-export commonly used types
pub use error::{AuthError, Result};
pub use services::SessionService;

/// Name used for pool metrics and log fields.
pub const SERVICE_NAME: &str = "auth-security-service";
