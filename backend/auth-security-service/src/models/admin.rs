use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Revoke,
    Restore,
}

impl Access {
    pub fn revoked(&self) -> bool {
        matches!(self, Access::Revoke)
    }
}

/// Administrative revocation commands. Each variant touches one fixed set of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum RevokeCommand {
    Identity {
        identity_id: i64,
        access: Access,
    },
    ChannelType {
        channel: String,
        access: Access,
    },
    Binding {
        identity_id: i64,
        channel: String,
        access: Access,
    },
    /// Revoking deactivates the key; restoring reactivates it and optionally moves its
    /// expiry date.
    ClientKey {
        key: String,
        access: Access,
        expires_at: Option<DateTime<Utc>>,
    },
}

impl RevokeCommand {
    pub fn access(&self) -> Access {
        match self {
            RevokeCommand::Identity { access, .. }
            | RevokeCommand::ChannelType { access, .. }
            | RevokeCommand::Binding { access, .. }
            | RevokeCommand::ClientKey { access, .. } => *access,
        }
    }

    pub fn target(&self) -> &'static str {
        match self {
            RevokeCommand::Identity { .. } => "identity",
            RevokeCommand::ChannelType { .. } => "channel type",
            RevokeCommand::Binding { .. } => "channel binding",
            RevokeCommand::ClientKey { .. } => "client key",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_from_json() {
        let cmd: RevokeCommand = serde_json::from_str(
            r#"{"target":"binding","identity_id":42,"channel":"web","access":"revoke"}"#,
        )
        .unwrap();

        assert_eq!(
            cmd,
            RevokeCommand::Binding {
                identity_id: 42,
                channel: "web".into(),
                access: Access::Revoke,
            }
        );
        assert!(cmd.access().revoked());
        assert_eq!(cmd.target(), "channel binding");
    }
}
