/// Database access for the credential and session engine
///
/// Each concern sits behind a trait so the services can run against PostgreSQL in
/// production and in-memory stores in tests. All `sqlx::Error`s are mapped to
/// [`AuthError`](crate::error::AuthError) here, at the store boundary.
use crate::error::Result;
use crate::models::{
    ChannelBinding, ChannelType, ClientKey, CredentialPair, Identity, RevokeCommand, TokenRecord,
};
use async_trait::async_trait;

pub mod credentials;
pub mod mfa_secrets;
pub mod tokens;

#[cfg(test)]
pub(crate) mod memory;

pub use credentials::PgCredentialStore;
pub use mfa_secrets::PgMfaSecretStore;
pub use tokens::PgTokenStore;

/// Identities, channels, bindings and client keys. Source of truth for revocation state.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_identity(&self, identity_id: i64) -> Result<Option<Identity>>;

    async fn find_channel_type(&self, channel: &str) -> Result<Option<ChannelType>>;

    async fn find_binding(&self, identity_id: i64, channel: &str)
        -> Result<Option<ChannelBinding>>;

    async fn find_binding_by_login(
        &self,
        channel: &str,
        login_name: &str,
    ) -> Result<Option<ChannelBinding>>;

    async fn find_client_key(&self, key: &str) -> Result<Option<ClientKey>>;

    /// Mail address on record for a login name, on any channel.
    async fn find_mail_by_login(&self, login_name: &str) -> Result<Option<String>>;

    /// Set the password hash of every binding with `login_name`. Returns rows updated.
    async fn update_password_by_login(&self, login_name: &str, password_hash: &str)
        -> Result<u64>;

    /// Apply a revoke/restore command. Returns rows updated.
    async fn apply_revocation(&self, command: &RevokeCommand) -> Result<u64>;

    async fn create_channel_type(&self, channel: &str) -> Result<()>;
}

/// Current token pair per credential pair, plus the append-only history.
///
/// The token manager is the only writer.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn current(&self, pair: &CredentialPair) -> Result<Option<TokenRecord>>;

    /// Archive the current record for the pair, if any, and store `record` in its place.
    async fn replace(&self, record: &TokenRecord) -> Result<()>;

    /// Swap in `next` only while the stored record still holds `expected`'s tokens,
    /// archiving the old one. Returns `false` when another writer got there first.
    async fn rotate_access(&self, expected: &TokenRecord, next: &TokenRecord) -> Result<bool>;

    /// Superseded records for the pair, oldest first.
    async fn history(&self, pair: &CredentialPair) -> Result<Vec<TokenRecord>>;
}

/// One TOTP secret per credential pair.
#[async_trait]
pub trait MfaSecretStore: Send + Sync {
    async fn find(&self, pair: &CredentialPair) -> Result<Option<String>>;

    /// Store `candidate` unless the pair already has a secret, then return the stored
    /// secret and whether `candidate` was the one kept. Concurrent callers for the same
    /// pair all get the same secret.
    async fn get_or_create(&self, pair: &CredentialPair, candidate: &str)
        -> Result<(String, bool)>;
}
