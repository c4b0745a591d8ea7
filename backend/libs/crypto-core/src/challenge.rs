/// MFA challenge encryption
///
/// Seals a login's `username:password` under a key derived from the per-binding MFA secret,
/// so the caller can only complete the login by proving possession of that secret.
///
/// ## Format
///
/// base64url (no padding) of:
/// - Nonce (12 bytes): fresh for every seal, never reused
/// - Ciphertext (variable)
/// - Tag (16 bytes)
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;

use crate::CryptoError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_INFO: &[u8] = b"mfa-challenge-v1";

/// AES-256-GCM cipher keyed by one MFA secret.
pub struct ChallengeCipher {
    cipher: Aes256Gcm,
}

impl ChallengeCipher {
    /// Derive the cipher key from the raw MFA secret with HKDF-SHA256.
    pub fn from_secret(secret: &[u8]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::InvalidKey("empty MFA secret".into()));
        }

        let hk = Hkdf::<Sha256>::new(None, secret);
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|e| CryptoError::InvalidKey(format!("HKDF expand failed: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(format!("AES key rejected: {e}")))?;

        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload::from(plaintext))
            .map_err(|e| CryptoError::Encryption(format!("AES-GCM failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|e| CryptoError::Decryption(format!("invalid encoding: {e}")))?;

        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption("challenge too short".into()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), Payload::from(ciphertext))
            .map_err(|_| CryptoError::Decryption("authentication tag mismatch".into()))
    }
}
