/// Layered credential checks
///
/// A login or refresh is honoured only when every layer above it still is:
/// identity, then channel type, then the identity's binding on that channel, then the
/// client key. The first failing layer decides the error.
use crate::db::CredentialStore;
use crate::error::{AuthError, Result, RevokedScope};
use crate::models::{ChannelBinding, ClientKey};
use chrono::Utc;
use std::sync::Arc;

/// What a successful validation resolved.
#[derive(Debug, Clone)]
pub struct ValidatedCredentials {
    pub binding: ChannelBinding,
    pub client_key: ClientKey,
}

#[derive(Clone)]
pub struct CredentialValidator {
    store: Arc<dyn CredentialStore>,
}

impl CredentialValidator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub async fn validate(
        &self,
        identity_id: i64,
        channel: &str,
        client_key: &str,
    ) -> Result<ValidatedCredentials> {
        let identity = self
            .store
            .find_identity(identity_id)
            .await?
            .ok_or_else(|| AuthError::UnknownCredential("identity".into()))?;
        if identity.revoked {
            return Err(AuthError::Revoked(RevokedScope::Identity));
        }

        let channel_type = self
            .store
            .find_channel_type(channel)
            .await?
            .ok_or_else(|| AuthError::UnknownCredential("channel type".into()))?;
        if channel_type.revoked {
            return Err(AuthError::Revoked(RevokedScope::ChannelType));
        }

        let binding = self
            .store
            .find_binding(identity_id, channel)
            .await?
            .ok_or_else(|| AuthError::UnknownCredential("channel binding".into()))?;
        if binding.revoked || !binding.validated {
            return Err(AuthError::Revoked(RevokedScope::Binding));
        }

        let key = self
            .store
            .find_client_key(client_key)
            .await?
            .ok_or_else(|| AuthError::UnknownCredential("client key".into()))?;
        if key.is_expired_at(Utc::now()) {
            return Err(AuthError::Revoked(RevokedScope::ClientKey));
        }

        Ok(ValidatedCredentials {
            binding,
            client_key: key,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db::memory::MemoryCredentialStore;
    use crate::models::{Access, ClientKeyStatus, RevokeCommand};
    use chrono::Duration;

    async fn check(store: Arc<MemoryCredentialStore>) -> Result<ValidatedCredentials> {
        CredentialValidator::new(store).validate(42, "web", "K1").await
    }

    #[tokio::test]
    async fn test_valid_credentials() {
        let store = Arc::new(seeded_store("hash"));
        let ok = check(store).await.unwrap();
        assert_eq!(ok.binding.id, 7);
        assert_eq!(ok.client_key.access_token_minutes, 60);
    }

    #[tokio::test]
    async fn test_revoked_identity_wins_over_everything() {
        let store = Arc::new(seeded_store("hash"));
        // Break every later layer too
        for command in [
            RevokeCommand::Identity {
                identity_id: 42,
                access: Access::Revoke,
            },
            RevokeCommand::ChannelType {
                channel: "web".into(),
                access: Access::Revoke,
            },
            RevokeCommand::Binding {
                identity_id: 42,
                channel: "web".into(),
                access: Access::Revoke,
            },
            RevokeCommand::ClientKey {
                key: "K1".into(),
                access: Access::Revoke,
                expires_at: None,
            },
        ] {
            store.apply_revocation(&command).await.unwrap();
        }

        let err = check(store).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked(RevokedScope::Identity)));
    }

    #[tokio::test]
    async fn test_layers_in_order() {
        let store = Arc::new(seeded_store("hash"));

        store
            .apply_revocation(&RevokeCommand::ChannelType {
                channel: "web".into(),
                access: Access::Revoke,
            })
            .await
            .unwrap();
        assert!(matches!(
            check(store.clone()).await.unwrap_err(),
            AuthError::Revoked(RevokedScope::ChannelType)
        ));

        store
            .apply_revocation(&RevokeCommand::ChannelType {
                channel: "web".into(),
                access: Access::Restore,
            })
            .await
            .unwrap();
        store.update_binding(7, |b| b.validated = false);
        assert!(matches!(
            check(store.clone()).await.unwrap_err(),
            AuthError::Revoked(RevokedScope::Binding)
        ));

        store.update_binding(7, |b| b.validated = true);
        let mut expired = client_key("K1", 60);
        expired.expires_at = Utc::now() - Duration::minutes(1);
        store.add_key(expired);
        assert!(matches!(
            check(store.clone()).await.unwrap_err(),
            AuthError::Revoked(RevokedScope::ClientKey)
        ));

        let mut inactive = client_key("K1", 60);
        inactive.status = ClientKeyStatus::Inactive;
        store.add_key(inactive);
        assert!(matches!(
            check(store).await.unwrap_err(),
            AuthError::Revoked(RevokedScope::ClientKey)
        ));
    }

    #[tokio::test]
    async fn test_unknown_credentials() {
        let store = Arc::new(seeded_store("hash"));
        let validator = CredentialValidator::new(store);

        for (identity, channel, key) in [(99, "web", "K1"), (42, "fax", "K1"), (42, "web", "K9")] {
            let err = validator.validate(identity, channel, key).await.unwrap_err();
            assert!(matches!(err, AuthError::UnknownCredential(_)), "{:?}", err);
        }
    }
}
