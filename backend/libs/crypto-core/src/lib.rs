//! Cryptographic primitives shared by the authentication components.
//!
//! - [`jwt`]: HS256 access/refresh token signing with independent secrets
//! - [`challenge`]: AES-256-GCM sealing of MFA challenges under an HKDF-derived key
//! - [`random`]: random credentials for password recovery

pub mod challenge;
pub mod jwt;
pub mod random;

pub use challenge::ChallengeCipher;
pub use random::generate_password;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("decryption error: {0}")]
    Decryption(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
}
