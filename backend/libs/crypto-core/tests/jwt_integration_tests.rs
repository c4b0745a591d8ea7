/// Integration tests for crypto-core token signing
///
/// Covers the session scenario the authentication service relies on: an access/refresh
/// pair, an access rotation, and validation of both generations.
use chrono::{Duration, Utc};
use crypto_core::jwt::{JwtError, JwtKeys, TokenKind, TokenStatus, TokenSubject};

fn keys() -> JwtKeys {
    JwtKeys::new(b"integration-access-secret", b"integration-refresh-secret")
        .expect("Failed to build test keys")
}

#[test]
fn test_pair_lifetimes_follow_policy() {
    let keys = keys();
    let subject = TokenSubject::new(42, "K1", "web");
    let now = Utc::now();

    let access = keys
        .sign_at(TokenKind::Access, &subject, now, Duration::minutes(60))
        .unwrap();
    let refresh = keys
        .sign_at(TokenKind::Refresh, &subject, now, Duration::minutes(1440))
        .unwrap();

    let access_claims = keys.decode(TokenKind::Access, &access.token).unwrap();
    let refresh_claims = keys.decode(TokenKind::Refresh, &refresh.token).unwrap();

    assert_eq!(access_claims.exp, (now + Duration::minutes(60)).timestamp());
    assert_eq!(refresh_claims.exp, (now + Duration::minutes(1440)).timestamp());
    assert_eq!(access_claims.subject(), refresh_claims.subject());
}

#[test]
fn test_previous_access_token_keeps_validating_after_rotation() {
    let keys = keys();
    let subject = TokenSubject::new(42, "K1", "web");

    let first = keys
        .sign(TokenKind::Access, &subject, Duration::minutes(60))
        .unwrap();
    let second = keys
        .sign(TokenKind::Access, &subject, Duration::minutes(60))
        .unwrap();

    assert_ne!(first.token, second.token);
    assert!(matches!(keys.inspect_access(&first.token), TokenStatus::Valid(_)));
    assert!(matches!(keys.inspect_access(&second.token), TokenStatus::Valid(_)));
}

#[test]
fn test_foreign_keys_do_not_verify() {
    let ours = keys();
    let theirs = JwtKeys::new(b"other-access", b"other-refresh").unwrap();
    let subject = TokenSubject::new(7, "K2", "mobile");

    let token = theirs
        .sign(TokenKind::Access, &subject, Duration::minutes(5))
        .unwrap();

    assert_eq!(
        ours.decode(TokenKind::Access, &token.token),
        Err(JwtError::InvalidSignature)
    );
    assert_eq!(ours.inspect_access(&token.token), TokenStatus::InvalidSignature);
}
