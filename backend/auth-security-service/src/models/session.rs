use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Login request
#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
    #[validate(length(min = 1, max = 255))]
    pub client_key: String,
    #[validate(length(min = 1, max = 64))]
    pub channel: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("client_key", &self.client_key)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Second login step: the sealed challenge plus a current TOTP code.
#[derive(Deserialize, Validate)]
pub struct MfaLoginRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(length(min = 1, max = 255))]
    pub client_key: String,
    #[validate(length(min = 1, max = 64))]
    pub channel: String,
    #[validate(length(min = 1))]
    pub challenge: String,
    #[validate(length(equal = 6))]
    pub code: String,
}

impl fmt::Debug for MfaLoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaLoginRequest")
            .field("username", &self.username)
            .field("client_key", &self.client_key)
            .field("channel", &self.channel)
            .field("code", &"[REDACTED]")
            .finish()
    }
}

/// Access token refresh request
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
    #[validate(length(min = 1))]
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// MFA challenge handed back instead of tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptedChallenge {
    pub challenge: String,
    /// `otpauth://` URI, present only when the MFA secret was created by this login.
    pub enrollment_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    Authenticated(TokenPair),
    ChallengeRequired(EncryptedChallenge),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    Valid,
    Expired,
    InvalidSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTokenCheck {
    pub identity: Option<i64>,
    pub status: TokenState,
}

/// The current token pair stored for a credential pair.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TokenRecord {
    pub client_key: String,
    pub binding_id: i64,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}
