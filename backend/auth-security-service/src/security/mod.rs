/// Security primitives for the credential and session engine
///
/// - **password**: Argon2id password hashing
/// - **totp**: TOTP secrets, codes and enrollment URIs
/// - **validator**: layered revocation checks over the credential store
///
/// Token signing and challenge encryption live in `crypto-core`.
pub use crypto_core::jwt;

pub mod password;
pub mod totp;
pub mod validator;

pub use password::{hash_password, verify_password};
pub use totp::TOTPGenerator;
pub use validator::{CredentialValidator, ValidatedCredentials};
