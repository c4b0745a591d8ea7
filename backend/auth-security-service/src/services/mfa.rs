/// MFA challenge issuance and redemption
///
/// When either the client key or the channel binding requires MFA, login returns the sealed
/// username and password (as a small JSON object) instead of tokens. The blob is keyed by the TOTP secret of the
/// (client key, binding) pair, so only a caller that can also produce a current code for
/// that secret gets the credentials back through [`MfaChallengeEngine::redeem`].
use crate::db::MfaSecretStore;
use crate::error::{AuthError, Result};
use crate::models::{ChannelBinding, ClientKey, CredentialPair, EncryptedChallenge};
use crate::security::TOTPGenerator;
use crypto_core::ChallengeCipher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Plaintext of a challenge. Login names may contain any character, so the two fields are
/// never joined with a separator.
#[derive(Serialize, Deserialize)]
struct SealedLogin {
    #[serde(rename = "u")]
    username: String,
    #[serde(rename = "p")]
    password: String,
}

#[derive(Clone)]
pub struct MfaChallengeEngine {
    secrets: Arc<dyn MfaSecretStore>,
    issuer: String,
}

impl MfaChallengeEngine {
    pub fn new(secrets: Arc<dyn MfaSecretStore>, issuer: impl Into<String>) -> Self {
        Self {
            secrets,
            issuer: issuer.into(),
        }
    }

    /// `None` when neither side requires MFA; otherwise the sealed challenge.
    ///
    /// The secret is created on first use and reused afterwards. Concurrent first logins
    /// for the same pair agree on one secret.
    pub async fn challenge(
        &self,
        binding: &ChannelBinding,
        client_key: &ClientKey,
        username: &str,
        password: &str,
    ) -> Result<Option<EncryptedChallenge>> {
        if !client_key.mfa_required && !binding.mfa_required {
            return Ok(None);
        }

        let pair = CredentialPair::new(client_key.key.clone(), binding.id);
        let candidate = TOTPGenerator::generate_secret();
        let (secret, created) = self.secrets.get_or_create(&pair, &candidate).await?;

        let cipher = ChallengeCipher::from_secret(&TOTPGenerator::decode_secret(&secret)?)?;
        let plaintext = serde_json::to_vec(&SealedLogin {
            username: username.to_string(),
            password: password.to_string(),
        })
        .map_err(|e| AuthError::Internal(format!("failed to encode challenge: {}", e)))?;
        let challenge = cipher.seal(&plaintext)?;

        let enrollment_uri = if created {
            info!(
                binding_id = binding.id,
                client_key = %client_key.key,
                "Created MFA secret"
            );
            Some(TOTPGenerator::provisioning_uri(
                &self.issuer,
                &binding.login_name,
                &secret,
            )?)
        } else {
            debug!(binding_id = binding.id, "Reusing MFA secret");
            None
        };

        Ok(Some(EncryptedChallenge {
            challenge,
            enrollment_uri,
        }))
    }

    /// Check `code` against the pair's secret and unseal the challenge into
    /// `(username, password)`.
    pub async fn redeem(
        &self,
        pair: &CredentialPair,
        challenge: &str,
        code: &str,
    ) -> Result<(String, String)> {
        let secret = self
            .secrets
            .find(pair)
            .await?
            .ok_or(AuthError::InvalidMfaCode)?;

        if !TOTPGenerator::verify_code(&secret, code)? {
            warn!(binding_id = pair.binding_id, "MFA code rejected");
            return Err(AuthError::InvalidMfaCode);
        }

        let cipher = ChallengeCipher::from_secret(&TOTPGenerator::decode_secret(&secret)?)?;
        let plaintext = cipher
            .open(challenge)
            .map_err(|_| AuthError::InvalidMfaCode)?;

        let login: SealedLogin =
            serde_json::from_slice(&plaintext).map_err(|_| AuthError::InvalidMfaCode)?;

        Ok((login.username, login.password))
    }
}
