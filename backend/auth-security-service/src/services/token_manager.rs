/// Access/refresh token lifecycle
///
/// Exactly one token pair is honoured per (client key, binding). Issuing a pair or
/// rotating its access token archives the previous record first, so history holds
/// every superseded pair in issuance order.
use crate::db::TokenStore;
use crate::error::{AuthError, Result};
use crate::models::{AccessTokenCheck, CredentialPair, TokenPair, TokenRecord, TokenState};
use chrono::{Duration, Utc};
use crypto_core::jwt::{Claims, JwtKeys, TokenKind, TokenStatus, TokenSubject};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    keys: Arc<JwtKeys>,
    refresh_lifetime: Duration,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, keys: Arc<JwtKeys>, refresh_lifetime: Duration) -> Self {
        Self {
            store,
            keys,
            refresh_lifetime,
        }
    }

    /// Sign a new pair for `subject` and make it the pair's only current record.
    pub async fn issue(
        &self,
        subject: &TokenSubject,
        binding_id: i64,
        access_minutes: i32,
    ) -> Result<TokenPair> {
        let now = Utc::now();
        let access = self.keys.sign_at(
            TokenKind::Access,
            subject,
            now,
            Duration::minutes(i64::from(access_minutes)),
        )?;
        let refresh = self
            .keys
            .sign_at(TokenKind::Refresh, subject, now, self.refresh_lifetime)?;

        let record = TokenRecord {
            client_key: subject.client_key.clone(),
            binding_id,
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
            issued_at: now,
        };
        self.store.replace(&record).await?;

        info!(
            identity = subject.identity,
            binding_id,
            client_key = %subject.client_key,
            "Issued token pair"
        );

        Ok(pair_of(record))
    }

    /// Verify a refresh token's signature and expiry.
    pub fn decode_refresh(&self, refresh_token: &str) -> Result<Claims> {
        Ok(self.keys.decode(TokenKind::Refresh, refresh_token)?)
    }

    /// Replace the access token of the pair `claims` belongs to.
    ///
    /// Both presented tokens must equal the stored ones. The refresh token and its expiry
    /// carry over unchanged.
    pub async fn refresh(
        &self,
        claims: &Claims,
        binding_id: i64,
        access_minutes: i32,
        refresh_token: &str,
        presented_access: &str,
    ) -> Result<TokenPair> {
        let pair = CredentialPair::new(claims.client_key.clone(), binding_id);
        let current = self
            .store
            .current(&pair)
            .await?
            .ok_or(AuthError::NeverLoggedIn)?;

        if current.refresh_token != refresh_token {
            warn!(binding_id, "Refresh rejected: refresh token superseded");
            return Err(AuthError::StaleRefreshToken);
        }
        if current.access_token != presented_access {
            warn!(binding_id, "Refresh rejected: access token superseded");
            return Err(AuthError::StaleAccessToken);
        }

        let now = Utc::now();
        let access = self.keys.sign_at(
            TokenKind::Access,
            &claims.subject(),
            now,
            Duration::minutes(i64::from(access_minutes)),
        )?;

        let next = TokenRecord {
            access_token: access.token,
            access_expires_at: access.expires_at,
            issued_at: now,
            ..current.clone()
        };

        if !self.store.rotate_access(&current, &next).await? {
            warn!(binding_id, "Refresh lost a race with a concurrent writer");
            return Err(AuthError::StaleRefreshToken);
        }

        debug!(binding_id, "Rotated access token");
        Ok(pair_of(next))
    }

    /// Signature and expiry check only. Never consults the store, never fails.
    pub fn validate(&self, access_token: &str) -> AccessTokenCheck {
        match self.keys.inspect_access(access_token) {
            TokenStatus::Valid(claims) => AccessTokenCheck {
                identity: Some(claims.identity),
                status: TokenState::Valid,
            },
            TokenStatus::Expired { identity } => AccessTokenCheck {
                identity,
                status: TokenState::Expired,
            },
            TokenStatus::InvalidSignature => AccessTokenCheck {
                identity: None,
                status: TokenState::InvalidSignature,
            },
        }
    }

    pub async fn history(&self, pair: &CredentialPair) -> Result<Vec<TokenRecord>> {
        self.store.history(pair).await
    }
}

fn pair_of(record: TokenRecord) -> TokenPair {
    TokenPair {
        access_token: record.access_token,
        access_expires_at: record.access_expires_at,
        refresh_token: record.refresh_token,
        refresh_expires_at: record.refresh_expires_at,
    }
}

#[cfg(test)]
pub(crate) fn test_keys() -> Arc<JwtKeys> {
    Arc::new(JwtKeys::new(b"test-access-secret", b"test-refresh-secret").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryTokenStore;
    use std::collections::HashSet;

    fn manager() -> (TokenManager, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::default());
        let manager = TokenManager::new(store.clone(), test_keys(), Duration::minutes(1440));
        (manager, store)
    }

    fn subject() -> TokenSubject {
        TokenSubject::new(42, "K1", "web")
    }

    async fn refresh(manager: &TokenManager, pair: &TokenPair) -> Result<TokenPair> {
        let claims = manager.decode_refresh(&pair.refresh_token)?;
        manager
            .refresh(&claims, 7, 60, &pair.refresh_token, &pair.access_token)
            .await
    }

    #[tokio::test]
    async fn test_issue_lifetimes() {
        let (manager, _) = manager();
        let before = Utc::now();
        let pair = manager.issue(&subject(), 7, 60).await.unwrap();

        let access_in = pair.access_expires_at - before;
        assert!(access_in <= Duration::minutes(60) + Duration::seconds(2));
        assert!(access_in >= Duration::minutes(60) - Duration::seconds(2));
        let refresh_in = pair.refresh_expires_at - before;
        assert!(refresh_in >= Duration::minutes(1440) - Duration::seconds(2));

        let check = manager.validate(&pair.access_token);
        assert_eq!(check.status, TokenState::Valid);
        assert_eq!(check.identity, Some(42));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_and_old_access_validates() {
        let (manager, _) = manager();
        let first = manager.issue(&subject(), 7, 60).await.unwrap();
        let second = refresh(&manager, &first).await.unwrap();

        assert_ne!(first.access_token, second.access_token);
        assert_eq!(first.refresh_token, second.refresh_token);
        assert_eq!(first.refresh_expires_at, second.refresh_expires_at);
        assert!(second.access_expires_at >= first.access_expires_at);
        // Validation is stateless
        assert_eq!(manager.validate(&first.access_token).status, TokenState::Valid);
    }

    #[tokio::test]
    async fn test_single_active_token_with_history() {
        let (manager, store) = manager();
        let mut current = manager.issue(&subject(), 7, 60).await.unwrap();

        for _ in 0..5 {
            current = refresh(&manager, &current).await.unwrap();
        }

        let pair = CredentialPair::new("K1", 7);
        let stored = store.current(&pair).await.unwrap().unwrap();
        assert_eq!(stored.access_token, current.access_token);

        let history = manager.history(&pair).await.unwrap();
        assert_eq!(history.len(), 5);
        let distinct: HashSet<_> = history.iter().map(|r| r.access_token.clone()).collect();
        assert_eq!(distinct.len(), 5);
        assert!(!distinct.contains(&current.access_token));
    }

    #[tokio::test]
    async fn test_stale_tokens_rejected() {
        let (manager, _) = manager();
        let gen1 = manager.issue(&subject(), 7, 60).await.unwrap();
        let gen2 = manager.issue(&subject(), 7, 60).await.unwrap();
        let _gen3 = manager.issue(&subject(), 7, 60).await.unwrap();

        for stale in [&gen1, &gen2] {
            let err = refresh(&manager, stale).await.unwrap_err();
            assert!(matches!(err, AuthError::StaleRefreshToken), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_superseded_access_token_rejected() {
        let (manager, _) = manager();
        let first = manager.issue(&subject(), 7, 60).await.unwrap();
        let second = refresh(&manager, &first).await.unwrap();

        // Current refresh token, previous access token
        let claims = manager.decode_refresh(&second.refresh_token).unwrap();
        let err = manager
            .refresh(&claims, 7, 60, &second.refresh_token, &first.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StaleAccessToken));
    }

    #[tokio::test]
    async fn test_never_logged_in() {
        let (manager, _) = manager();
        let refresh_token = test_keys()
            .sign(TokenKind::Refresh, &subject(), Duration::minutes(10))
            .unwrap();
        let claims = manager.decode_refresh(&refresh_token.token).unwrap();

        let err = manager
            .refresh(&claims, 7, 60, &refresh_token.token, "whatever")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NeverLoggedIn));
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let (manager, _) = manager();
        let expired = test_keys()
            .sign_at(
                TokenKind::Refresh,
                &subject(),
                Utc::now() - Duration::hours(2),
                Duration::hours(1),
            )
            .unwrap();

        let err = manager.decode_refresh(&expired.token).unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[test]
    fn test_validate_never_fails() {
        let store = Arc::new(MemoryTokenStore::default());
        let manager = TokenManager::new(store, test_keys(), Duration::minutes(1440));

        let garbage = manager.validate("not.a.jwt");
        assert_eq!(garbage.status, TokenState::InvalidSignature);
        assert_eq!(garbage.identity, None);

        let expired = test_keys()
            .sign_at(
                TokenKind::Access,
                &subject(),
                Utc::now() - Duration::hours(2),
                Duration::hours(1),
            )
            .unwrap();
        let check = manager.validate(&expired.token);
        assert_eq!(check.status, TokenState::Expired);
        assert_eq!(check.identity, Some(42));

        // A refresh token is not an access token
        let refresh = test_keys()
            .sign(TokenKind::Refresh, &subject(), Duration::minutes(10))
            .unwrap();
        assert_eq!(
            manager.validate(&refresh.token).status,
            TokenState::InvalidSignature
        );
    }
}
