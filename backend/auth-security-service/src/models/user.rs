use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// User registration request
#[derive(Deserialize, Validate)]
pub struct RegisterUserRequest {
    /// Existing identity to attach the binding to; a new identity is created when absent
    /// or unknown.
    pub identity_id: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub channel: String,
    #[validate(length(min = 1, max = 255))]
    pub login_name: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(email)]
    pub mail: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

impl fmt::Debug for RegisterUserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterUserRequest")
            .field("identity_id", &self.identity_id)
            .field("channel", &self.channel)
            .field("login_name", &self.login_name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Payload of `user.created` events.
///
/// Carries the password hash so replicas can register the same credential; the plaintext
/// never leaves the registering request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreatedPayload {
    pub identity_id: i64,
    pub channel: String,
    pub login_name: String,
    pub password_hash: String,
    pub mail: Option<String>,
    pub phone: Option<String>,
}

impl fmt::Debug for UserCreatedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCreatedPayload")
            .field("identity_id", &self.identity_id)
            .field("channel", &self.channel)
            .field("login_name", &self.login_name)
            .field("password_hash", &"[REDACTED]")
            .finish()
    }
}
