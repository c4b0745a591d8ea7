use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// A person. Created on first registration, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub id: i64,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// An authentication channel such as "web" or "mobile".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChannelType {
    pub name: String,
    pub revoked: bool,
}

/// An identity's credentials on one channel.
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct ChannelBinding {
    pub id: i64,
    pub identity_id: i64,
    pub channel: String,
    pub login_name: String,
    pub password_hash: String,
    pub mail: Option<String>,
    pub phone: Option<String>,
    pub validated: bool,
    pub revoked: bool,
    pub mfa_required: bool,
}

impl fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("id", &self.id)
            .field("identity_id", &self.identity_id)
            .field("channel", &self.channel)
            .field("login_name", &self.login_name)
            .field("password_hash", &"[REDACTED]")
            .field("validated", &self.validated)
            .field("revoked", &self.revoked)
            .field("mfa_required", &self.mfa_required)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientKeyStatus {
    Active,
    Inactive,
}

impl ClientKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKeyStatus::Active => "ACTIVE",
            ClientKeyStatus::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for ClientKeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ClientKeyStatus::Active),
            "INACTIVE" => Ok(ClientKeyStatus::Inactive),
            other => Err(format!("unknown client key status: {}", other)),
        }
    }
}

/// An API client key. Every token references exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientKey {
    pub key: String,
    pub expires_at: DateTime<Utc>,
    pub superuser: bool,
    pub mfa_required: bool,
    /// Access token lifetime granted to logins through this key.
    pub access_token_minutes: i32,
    pub status: ClientKeyStatus,
}

impl ClientKey {
    /// Expired when the expiry date has passed or the key was deactivated.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now || self.status == ClientKeyStatus::Inactive
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// The unit tokens and MFA secrets are kept per: one client key and one channel binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialPair {
    pub client_key: String,
    pub binding_id: i64,
}

impl CredentialPair {
    pub fn new(client_key: impl Into<String>, binding_id: i64) -> Self {
        Self {
            client_key: client_key.into(),
            binding_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(expires_in: Duration, status: ClientKeyStatus) -> ClientKey {
        ClientKey {
            key: "K1".into(),
            expires_at: Utc::now() + expires_in,
            superuser: false,
            mfa_required: false,
            access_token_minutes: 60,
            status,
        }
    }

    #[test]
    fn test_client_key_expiry() {
        assert!(!key(Duration::days(1), ClientKeyStatus::Active).is_expired());
        assert!(key(Duration::days(-1), ClientKeyStatus::Active).is_expired());
        assert!(key(Duration::days(1), ClientKeyStatus::Inactive).is_expired());
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!("ACTIVE".parse::<ClientKeyStatus>(), Ok(ClientKeyStatus::Active));
        assert_eq!(ClientKeyStatus::Inactive.as_str(), "INACTIVE");
        assert!("active".parse::<ClientKeyStatus>().is_err());
    }
}
