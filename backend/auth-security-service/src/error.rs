use crypto_core::jwt::JwtError;
use crypto_core::CryptoError;
use db_pool::DbErrorKind;
use serde::Serialize;
use thiserror::Error;
use transactional_outbox::OutboxError;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Which credential layer refused a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokedScope {
    Identity,
    ChannelType,
    Binding,
    ClientKey,
}

impl RevokedScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokedScope::Identity => "identity",
            RevokedScope::ChannelType => "channel type",
            RevokedScope::Binding => "channel binding",
            RevokedScope::ClientKey => "client key",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Access revoked: {}", .0.as_str())]
    Revoked(RevokedScope),

    #[error("Unknown credential: {0}")]
    UnknownCredential(String),

    #[error("Invalid MFA code")]
    InvalidMfaCode,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("No session for this credential pair")]
    NeverLoggedIn,

    #[error("Refresh token is not the current one")]
    StaleRefreshToken,

    #[error("Access token is not the current one")]
    StaleAccessToken,

    #[error("Operation requires a superuser client key")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Email delivery failed: {0}")]
    Email(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error classes callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Unauthorized,
    StaleToken,
    DuplicateEvent,
    Transient,
    Fatal,
    Internal,
}

/// Transport-neutral error codes exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicErrorCode {
    InvalidRequest,
    AuthenticationFailed,
    AccessRevoked,
    SessionInvalid,
    Forbidden,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicError {
    pub code: PublicErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl PublicError {
    fn new(code: PublicErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code == PublicErrorCode::Unavailable,
        }
    }
}

impl AuthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::Validation(_) | AuthError::NotFound(_) | AuthError::Conflict(_) => {
                ErrorCategory::Validation
            }
            AuthError::InvalidCredentials
            | AuthError::Revoked(_)
            | AuthError::UnknownCredential(_)
            | AuthError::InvalidMfaCode
            | AuthError::InvalidToken
            | AuthError::Forbidden => ErrorCategory::Unauthorized,
            AuthError::TokenExpired
            | AuthError::NeverLoggedIn
            | AuthError::StaleRefreshToken
            | AuthError::StaleAccessToken => ErrorCategory::StaleToken,
            AuthError::Unavailable(_) | AuthError::Email(_) => ErrorCategory::Transient,
            AuthError::Signing(_) | AuthError::Config(_) | AuthError::Crypto(_) => {
                ErrorCategory::Fatal
            }
            AuthError::Database(_) | AuthError::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Map to the client-facing form.
    ///
    /// Credential failures all read "authentication failed" so a caller cannot probe which
    /// login names, channels or keys exist. Internal details never leave the process.
    pub fn to_public(&self) -> PublicError {
        use PublicErrorCode as C;

        match self {
            AuthError::InvalidCredentials
            | AuthError::UnknownCredential(_)
            | AuthError::InvalidMfaCode
            | AuthError::InvalidToken => PublicError::new(C::AuthenticationFailed, "Authentication failed"),
            AuthError::Revoked(_) => PublicError::new(C::AccessRevoked, "Access revoked"),
            AuthError::TokenExpired
            | AuthError::NeverLoggedIn
            | AuthError::StaleRefreshToken
            | AuthError::StaleAccessToken => {
                PublicError::new(C::SessionInvalid, "Session is no longer valid, log in again")
            }
            AuthError::Forbidden => PublicError::new(C::Forbidden, "Operation not permitted"),
            AuthError::NotFound(what) => PublicError::new(C::NotFound, format!("Not found: {}", what)),
            AuthError::Conflict(what) => {
                PublicError::new(C::Conflict, format!("Already exists: {}", what))
            }
            AuthError::Validation(msg) => {
                PublicError::new(C::InvalidRequest, format!("Validation error: {}", msg))
            }
            AuthError::Unavailable(_) | AuthError::Email(_) => PublicError::new(
                C::Unavailable,
                "Service temporarily unavailable, try again later",
            ),
            AuthError::Signing(_)
            | AuthError::Config(_)
            | AuthError::Crypto(_)
            | AuthError::Database(_)
            | AuthError::Internal(_) => {
                // Don't leak internal details
                PublicError::new(C::Internal, "Internal server error")
            }
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match db_pool::classify(&err) {
            DbErrorKind::NotFound => AuthError::NotFound("record".to_string()),
            DbErrorKind::UniqueViolation => AuthError::Conflict(constraint_of(&err)),
            DbErrorKind::ForeignKeyViolation
            | DbErrorKind::NotNullViolation
            | DbErrorKind::InvalidInput => AuthError::Validation(err.to_string()),
            kind if kind.is_transient() => {
                tracing::warn!("Transient database error: {}", err);
                AuthError::Unavailable(err.to_string())
            }
            _ => {
                tracing::error!("Database error: {}", err);
                AuthError::Database(err.to_string())
            }
        }
    }
}

fn constraint_of(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db) => db.constraint().unwrap_or("unique key").to_string(),
        _ => "unique key".to_string(),
    }
}

impl From<OutboxError> for AuthError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Database(e) => e.into(),
            OutboxError::InvalidEvent(msg) => AuthError::Validation(msg),
            other if other.is_transient() => AuthError::Unavailable(other.to_string()),
            other => {
                tracing::error!("Outbox error: {}", other);
                AuthError::Internal(other.to_string())
            }
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::TokenExpired,
            JwtError::InvalidSignature | JwtError::Malformed(_) => AuthError::InvalidToken,
            JwtError::Signing(msg) => {
                tracing::error!("JWT signing error: {}", msg);
                AuthError::Signing(msg)
            }
            JwtError::Config(msg) => AuthError::Config(msg),
        }
    }
}

impl From<CryptoError> for AuthError {
    fn from(err: CryptoError) -> Self {
        tracing::error!("Crypto error: {}", err);
        AuthError::Crypto(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Internal(format!("{:#}", err))
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}
