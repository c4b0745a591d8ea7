/// Administrative commands
///
/// Every command names the client key it is issued under; only superuser keys that are
/// themselves active may change revocation state.
use crate::db::CredentialStore;
use crate::error::{AuthError, Result, RevokedScope};
use crate::models::{ClientKey, RevokeCommand};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_CHANNEL_LEN: usize = 64;

#[derive(Clone)]
pub struct AdminService {
    credentials: Arc<dyn CredentialStore>,
}

impl AdminService {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }

    async fn authorize(&self, authorizing_key: &str) -> Result<ClientKey> {
        let key = self
            .credentials
            .find_client_key(authorizing_key)
            .await?
            .ok_or_else(|| AuthError::UnknownCredential("client key".into()))?;

        if !key.superuser {
            warn!(client_key = %authorizing_key, "Admin command refused: not a superuser key");
            return Err(AuthError::Forbidden);
        }
        if key.is_expired() {
            return Err(AuthError::Revoked(RevokedScope::ClientKey));
        }

        Ok(key)
    }

    /// Revoke or restore one credential layer.
    pub async fn apply(&self, authorizing_key: &str, command: &RevokeCommand) -> Result<()> {
        self.authorize(authorizing_key).await?;

        let updated = self.credentials.apply_revocation(command).await?;
        if updated == 0 {
            return Err(AuthError::NotFound(command.target().to_string()));
        }

        info!(
            target_kind = command.target(),
            access = ?command.access(),
            authorized_by = %authorizing_key,
            "Applied admin command"
        );
        Ok(())
    }

    pub async fn create_channel_type(&self, authorizing_key: &str, channel: &str) -> Result<()> {
        self.authorize(authorizing_key).await?;

        let channel = channel.trim();
        if channel.is_empty() || channel.len() > MAX_CHANNEL_LEN {
            return Err(AuthError::Validation(format!(
                "channel type must be 1-{} characters",
                MAX_CHANNEL_LEN
            )));
        }

        self.credentials.create_channel_type(channel).await?;
        info!(channel, "Created channel type");
        Ok(())
    }

    /// Whether `key` has passed its expiry date or been deactivated.
    pub async fn is_client_key_expired(&self, key: &str) -> Result<bool> {
        let key = self
            .credentials
            .find_client_key(key)
            .await?
            .ok_or_else(|| AuthError::UnknownCredential("client key".into()))?;

        Ok(key.is_expired())
    }
}
