/// Time-based one-time passwords for MFA challenges
///
/// - Secret: 20 random bytes, stored base64-encoded
/// - Codes: 6 digits, 30-second step, HMAC-SHA1 (RFC 6238 defaults)
/// - Verification accepts the previous and next step to absorb clock drift
use crate::error::{AuthError, Result};
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine as _};
use rand::Rng;
use totp_lite::{totp_custom, Sha1};

const SECRET_LEN: usize = 20;
const TIME_STEP: u64 = 30;
const DIGITS: u32 = 6;
const SKEW_STEPS: u64 = 1;

pub struct TOTPGenerator;

impl TOTPGenerator {
    /// Generate a new base64-encoded TOTP secret.
    pub fn generate_secret() -> String {
        let mut rng = rand::thread_rng();
        let mut secret_bytes = [0u8; SECRET_LEN];
        rng.fill(&mut secret_bytes);

        base64_engine.encode(secret_bytes)
    }

    /// Raw secret bytes from the stored form.
    pub fn decode_secret(secret: &str) -> Result<Vec<u8>> {
        let secret_bytes = base64_engine
            .decode(secret)
            .map_err(|e| AuthError::Crypto(format!("Invalid MFA secret encoding: {}", e)))?;

        if secret_bytes.len() != SECRET_LEN {
            return Err(AuthError::Crypto(format!(
                "MFA secret must be {} bytes, got {}",
                SECRET_LEN,
                secret_bytes.len()
            )));
        }

        Ok(secret_bytes)
    }

    /// `otpauth://` URI for enrolling the secret in an authenticator app.
    ///
    /// Format: otpauth://totp/Issuer:Account?secret=BASE32&issuer=Issuer
    pub fn provisioning_uri(issuer: &str, account: &str, secret: &str) -> Result<String> {
        let secret_bytes = Self::decode_secret(secret)?;
        let secret_base32 =
            base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &secret_bytes);

        Ok(format!(
            "otpauth://totp/{}:{}?secret={}&issuer={}&digits={}&period={}",
            urlencoding::encode(issuer),
            urlencoding::encode(account),
            secret_base32,
            urlencoding::encode(issuer),
            DIGITS,
            TIME_STEP
        ))
    }

    /// The code for the step containing `unix_secs`.
    pub fn code_at(secret_bytes: &[u8], unix_secs: u64) -> String {
        totp_custom::<Sha1>(TIME_STEP, DIGITS, secret_bytes, unix_secs)
    }

    /// Verify a code against the current time.
    pub fn verify_code(secret: &str, code: &str) -> Result<bool> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| AuthError::Internal(format!("System clock before epoch: {}", e)))?
            .as_secs();

        Self::verify_code_at(secret, code, now)
    }

    pub fn verify_code_at(secret: &str, code: &str, unix_secs: u64) -> Result<bool> {
        if code.len() != DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }

        let secret_bytes = Self::decode_secret(secret)?;

        let earliest = unix_secs.saturating_sub(SKEW_STEPS * TIME_STEP);
        let latest = unix_secs + SKEW_STEPS * TIME_STEP;
        let matched = (earliest..=latest)
            .step_by(TIME_STEP as usize)
            .any(|t| Self::code_at(&secret_bytes, t) == code);

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B test secret
    const RFC_SECRET: &[u8] = b"12345678901234567890";

    fn rfc_secret_b64() -> String {
        base64_engine.encode(RFC_SECRET)
    }

    #[test]
    fn test_rfc6238_vector() {
        // 8-digit reference 94287082 at T=59; 6 digits keeps the low-order part
        assert_eq!(TOTPGenerator::code_at(RFC_SECRET, 59), "287082");
    }

    #[test]
    fn test_verify_with_skew() {
        let secret = rfc_secret_b64();
        let code = TOTPGenerator::code_at(RFC_SECRET, 1_000_000);

        assert!(TOTPGenerator::verify_code_at(&secret, &code, 1_000_000).unwrap());
        assert!(TOTPGenerator::verify_code_at(&secret, &code, 1_000_000 + 30).unwrap());
        assert!(TOTPGenerator::verify_code_at(&secret, &code, 1_000_000 - 30).unwrap());
        assert!(!TOTPGenerator::verify_code_at(&secret, &code, 1_000_000 + 90).unwrap());
    }

    #[test]
    fn test_verify_code_invalid_length() {
        let secret = TOTPGenerator::generate_secret();
        assert!(!TOTPGenerator::verify_code(&secret, "12345").unwrap());
        assert!(!TOTPGenerator::verify_code(&secret, "1234567").unwrap());
        assert!(!TOTPGenerator::verify_code(&secret, "12a456").unwrap());
    }

    #[test]
    fn test_verify_code_invalid_secret() {
        let result = TOTPGenerator::verify_code("invalid_base64!", "123456");
        assert!(result.is_err());
    }

    #[test]
    fn test_generated_secret_decodes() {
        let secret = TOTPGenerator::generate_secret();
        assert_eq!(TOTPGenerator::decode_secret(&secret).unwrap().len(), 20);
        assert_ne!(secret, TOTPGenerator::generate_secret());
    }

    #[test]
    fn test_provisioning_uri() {
        let uri =
            TOTPGenerator::provisioning_uri("Thinksoft", "alice@example.com", &rfc_secret_b64())
                .unwrap();
        assert!(uri.starts_with("otpauth://totp/Thinksoft:alice%40example.com?"));
        assert!(uri.contains("secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ"));
        assert!(uri.contains("issuer=Thinksoft"));
    }
}
