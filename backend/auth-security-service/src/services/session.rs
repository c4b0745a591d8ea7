/// Session orchestration: login, MFA completion, refresh, validate, revoke
///
/// ## Login
///
/// 1. Look up the binding by (channel, login name) and verify the password
/// 2. Check every credential layer ([`CredentialValidator`])
/// 3. If MFA applies, return a sealed challenge instead of tokens
/// 4. Issue a token pair, archiving the previous one
///
/// Unknown login names and wrong passwords produce the same error.
use crate::db::CredentialStore;
use crate::error::{AuthError, Result};
use crate::models::{
    AccessTokenCheck, CredentialPair, LoginOutcome, LoginRequest, MfaLoginRequest,
    RefreshRequest, RevokeCommand, TokenPair,
};
use crate::security::{verify_password, CredentialValidator, ValidatedCredentials};
use crate::services::{AdminService, MfaChallengeEngine, TokenManager};
use crypto_core::jwt::TokenSubject;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

#[derive(Clone)]
pub struct SessionService {
    credentials: Arc<dyn CredentialStore>,
    validator: CredentialValidator,
    mfa: MfaChallengeEngine,
    tokens: TokenManager,
    admin: AdminService,
}

impl SessionService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        mfa: MfaChallengeEngine,
        tokens: TokenManager,
    ) -> Self {
        Self {
            validator: CredentialValidator::new(credentials.clone()),
            admin: AdminService::new(credentials.clone()),
            credentials,
            mfa,
            tokens,
        }
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    #[instrument(skip(self, request), fields(login = %request.username, channel = %request.channel))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome> {
        request.validate()?;

        let binding = self
            .credentials
            .find_binding_by_login(&request.channel, &request.username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(&request.password, &binding.password_hash)? {
            warn!("Login rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let creds = self
            .validator
            .validate(binding.identity_id, &request.channel, &request.client_key)
            .await?;

        if let Some(challenge) = self
            .mfa
            .challenge(
                &creds.binding,
                &creds.client_key,
                &request.username,
                &request.password,
            )
            .await?
        {
            info!(binding_id = creds.binding.id, "MFA challenge issued");
            return Ok(LoginOutcome::ChallengeRequired(challenge));
        }

        let pair = self.issue(&creds, &request.channel).await?;
        Ok(LoginOutcome::Authenticated(pair))
    }

    /// Finish a login that returned a challenge.
    #[instrument(skip(self, request), fields(login = %request.username, channel = %request.channel))]
    pub async fn complete_challenge(&self, request: MfaLoginRequest) -> Result<TokenPair> {
        request.validate()?;

        let binding = self
            .credentials
            .find_binding_by_login(&request.channel, &request.username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let pair = CredentialPair::new(request.client_key.clone(), binding.id);
        let (username, password) = self
            .mfa
            .redeem(&pair, &request.challenge, &request.code)
            .await?;

        if username != request.username {
            return Err(AuthError::InvalidMfaCode);
        }
        // The password may have changed since the challenge was sealed
        if !verify_password(&password, &binding.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let creds = self
            .validator
            .validate(binding.identity_id, &request.channel, &request.client_key)
            .await?;

        self.issue(&creds, &request.channel).await
    }

    async fn issue(&self, creds: &ValidatedCredentials, channel: &str) -> Result<TokenPair> {
        let subject = TokenSubject::new(
            creds.binding.identity_id,
            creds.client_key.key.clone(),
            channel,
        );
        self.tokens
            .issue(
                &subject,
                creds.binding.id,
                creds.client_key.access_token_minutes,
            )
            .await
    }

    /// Swap the access token of a live session. Credentials are re-checked first, so a
    /// revoked identity, channel, binding or key cannot keep refreshing.
    pub async fn refresh(&self, request: RefreshRequest) -> Result<TokenPair> {
        request.validate()?;

        let claims = self.tokens.decode_refresh(&request.refresh_token)?;
        let creds = self
            .validator
            .validate(claims.identity, &claims.channel, &claims.client_key)
            .await?;

        self.tokens
            .refresh(
                &claims,
                creds.binding.id,
                creds.client_key.access_token_minutes,
                &request.refresh_token,
                &request.access_token,
            )
            .await
    }

    pub fn validate(&self, access_token: &str) -> AccessTokenCheck {
        self.tokens.validate(access_token)
    }

    pub async fn revoke(&self, authorizing_key: &str, command: &RevokeCommand) -> Result<()> {
        self.admin.apply(authorizing_key, command).await
    }
}
