/// Access/refresh token signing for the authentication service
///
/// Tokens are HS256-signed with two independent secrets: one for access tokens and one for
/// refresh tokens. A token signed with one secret never verifies under the other, so an
/// access token cannot be replayed as a refresh token or vice versa.
///
/// ## Usage
///
/// ```rust
/// use crypto_core::jwt::{JwtKeys, TokenKind, TokenSubject};
/// use chrono::Duration;
///
/// let keys = JwtKeys::new(b"access-secret-value", b"refresh-secret-value").unwrap();
/// let subject = TokenSubject::new(42, "K1", "web");
/// let signed = keys.sign(TokenKind::Access, &subject, Duration::minutes(60)).unwrap();
/// let claims = keys.decode(TokenKind::Access, &signed.token).unwrap();
/// assert_eq!(claims.identity, 42);
/// ```
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("token expired")]
    Expired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid key configuration: {0}")]
    Config(String),
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// The (identity, client key, channel) triple a token is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenSubject {
    pub identity: i64,
    pub client_key: String,
    pub channel: String,
}

impl TokenSubject {
    pub fn new(identity: i64, client_key: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            identity,
            client_key: client_key.into(),
            channel: channel.into(),
        }
    }
}

/// JWT claims carried by both token kinds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Identity the token was issued to
    pub identity: i64,
    /// Client key ("api key") the session is bound to
    pub client_key: String,
    /// Channel type the session was opened on
    pub channel: String,
    /// "access" or "refresh"
    pub token_type: TokenKind,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token id; two tokens issued in the same second still differ
    pub jti: String,
}

impl Claims {
    pub fn subject(&self) -> TokenSubject {
        TokenSubject::new(self.identity, self.client_key.clone(), self.channel.clone())
    }
}

/// A freshly signed token and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of checking an access token without touching any store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Valid(Claims),
    Expired { identity: Option<i64> },
    InvalidSignature,
}

// ============================================================================
// Keys
// ============================================================================

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Signing and verification keys for both token kinds.
pub struct JwtKeys {
    access: KeyPair,
    refresh: KeyPair,
}

impl fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtKeys")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .finish()
    }
}

impl JwtKeys {
    /// Build keys from two secrets.
    ///
    /// Fails when either secret is empty or both are identical.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Result<Self, JwtError> {
        if access_secret.is_empty() || refresh_secret.is_empty() {
            return Err(JwtError::Config("token secrets must not be empty".into()));
        }
        if access_secret == refresh_secret {
            return Err(JwtError::Config(
                "access and refresh secrets must differ".into(),
            ));
        }

        Ok(Self {
            access: KeyPair::from_secret(access_secret),
            refresh: KeyPair::from_secret(refresh_secret),
        })
    }

    fn pair(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    // ========================================================================
    // Token Generation
    // ========================================================================

    /// Sign a token of `kind` for `subject`, valid for `lifetime` from now.
    pub fn sign(
        &self,
        kind: TokenKind,
        subject: &TokenSubject,
        lifetime: Duration,
    ) -> Result<SignedToken, JwtError> {
        self.sign_at(kind, subject, Utc::now(), lifetime)
    }

    pub fn sign_at(
        &self,
        kind: TokenKind,
        subject: &TokenSubject,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Result<SignedToken, JwtError> {
        let expires_at = issued_at + lifetime;
        let claims = Claims {
            identity: subject.identity,
            client_key: subject.client_key.clone(),
            channel: subject.channel.clone(),
            token_type: kind,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(JWT_ALGORITHM), &claims, &self.pair(kind).encoding)
            .map_err(|e| JwtError::Signing(format!("failed to sign {} token: {e}", kind.as_str())))?;

        Ok(SignedToken {
            token,
            issued_at,
            expires_at,
        })
    }

    // ========================================================================
    // Token Validation
    // ========================================================================

    /// Verify signature and expiry of a token of `kind` and return its claims.
    pub fn decode(&self, kind: TokenKind, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.pair(kind).decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::Malformed(e.to_string()),
            })?;

        if data.claims.token_type != kind {
            return Err(JwtError::Malformed(format!(
                "expected {} token",
                kind.as_str()
            )));
        }

        Ok(data.claims)
    }

    /// Read claims without checking expiry. The signature is still verified.
    pub fn decode_allow_expired(&self, kind: TokenKind, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(token, &self.pair(kind).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::Malformed(e.to_string()),
            })
    }

    /// Classify an access token. Never fails: anything that does not verify is
    /// reported as [`TokenStatus::InvalidSignature`].
    pub fn inspect_access(&self, token: &str) -> TokenStatus {
        match self.decode(TokenKind::Access, token) {
            Ok(claims) => TokenStatus::Valid(claims),
            Err(JwtError::Expired) => TokenStatus::Expired {
                identity: self
                    .decode_allow_expired(TokenKind::Access, token)
                    .ok()
                    .map(|c| c.identity),
            },
            Err(_) => TokenStatus::InvalidSignature,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS_SECRET: &[u8] = b"test-access-secret-do-not-use";
    const REFRESH_SECRET: &[u8] = b"test-refresh-secret-do-not-use";

    fn keys() -> JwtKeys {
        JwtKeys::new(ACCESS_SECRET, REFRESH_SECRET).expect("test keys")
    }

    fn subject() -> TokenSubject {
        TokenSubject::new(42, "K1", "web")
    }

    #[test]
    fn test_identical_secrets_rejected() {
        assert!(matches!(
            JwtKeys::new(b"same", b"same"),
            Err(JwtError::Config(_))
        ));
        assert!(matches!(JwtKeys::new(b"", b"x"), Err(JwtError::Config(_))));
    }

    #[test]
    fn test_sign_and_decode_access_token() {
        let keys = keys();
        let signed = keys
            .sign(TokenKind::Access, &subject(), Duration::minutes(60))
            .unwrap();

        assert_eq!(signed.token.matches('.').count(), 2);

        let claims = keys.decode(TokenKind::Access, &signed.token).unwrap();
        assert_eq!(claims.subject(), subject());
        assert_eq!(claims.token_type, TokenKind::Access);
        assert_eq!(claims.exp, signed.expires_at.timestamp());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_kinds_do_not_cross_verify() {
        let keys = keys();
        let access = keys
            .sign(TokenKind::Access, &subject(), Duration::minutes(5))
            .unwrap();
        let refresh = keys
            .sign(TokenKind::Refresh, &subject(), Duration::minutes(5))
            .unwrap();

        assert_eq!(
            keys.decode(TokenKind::Refresh, &access.token),
            Err(JwtError::InvalidSignature)
        );
        assert_eq!(
            keys.decode(TokenKind::Access, &refresh.token),
            Err(JwtError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_token_reports_expired() {
        let keys = keys();
        let signed = keys
            .sign_at(
                TokenKind::Refresh,
                &subject(),
                Utc::now() - Duration::hours(2),
                Duration::hours(1),
            )
            .unwrap();

        assert_eq!(
            keys.decode(TokenKind::Refresh, &signed.token),
            Err(JwtError::Expired)
        );
        let claims = keys
            .decode_allow_expired(TokenKind::Refresh, &signed.token)
            .unwrap();
        assert_eq!(claims.identity, 42);
    }

    #[test]
    fn test_tokens_issued_together_are_distinct() {
        let keys = keys();
        let a = keys
            .sign(TokenKind::Access, &subject(), Duration::minutes(1))
            .unwrap();
        let b = keys
            .sign(TokenKind::Access, &subject(), Duration::minutes(1))
            .unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_inspect_access_statuses() {
        let keys = keys();
        let valid = keys
            .sign(TokenKind::Access, &subject(), Duration::minutes(1))
            .unwrap();
        let expired = keys
            .sign_at(
                TokenKind::Access,
                &subject(),
                Utc::now() - Duration::minutes(10),
                Duration::minutes(1),
            )
            .unwrap();

        assert!(matches!(
            keys.inspect_access(&valid.token),
            TokenStatus::Valid(c) if c.identity == 42
        ));
        assert_eq!(
            keys.inspect_access(&expired.token),
            TokenStatus::Expired { identity: Some(42) }
        );
        assert_eq!(keys.inspect_access("not-a-jwt"), TokenStatus::InvalidSignature);
        assert_eq!(keys.inspect_access(""), TokenStatus::InvalidSignature);

        let tampered = format!("{}x", valid.token);
        assert_eq!(keys.inspect_access(&tampered), TokenStatus::InvalidSignature);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", keys());
        assert!(!rendered.contains("test-access-secret"));
    }
}
