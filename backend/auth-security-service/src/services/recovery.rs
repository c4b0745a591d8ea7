use crate::db::CredentialStore;
use crate::error::{AuthError, Result};
use crate::security::hash_password;
use crate::services::email::Mailer;
use crypto_core::generate_password;
use std::sync::Arc;
use tracing::info;

const RECOVERY_PASSWORD_LEN: usize = 16;
const RECOVERY_SUBJECT: &str = "Your new password";

/// Replaces a forgotten password with a generated one sent by mail.
///
/// The mail goes out before anything is written: if delivery fails the old password
/// stays valid.
#[derive(Clone)]
pub struct PasswordRecoveryService {
    credentials: Arc<dyn CredentialStore>,
    mailer: Arc<dyn Mailer>,
}

impl PasswordRecoveryService {
    pub fn new(credentials: Arc<dyn CredentialStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            credentials,
            mailer,
        }
    }

    /// Returns the number of bindings whose password changed.
    pub async fn recover(&self, login_name: &str) -> Result<u64> {
        let password = generate_password(RECOVERY_PASSWORD_LEN);

        let mail = self
            .credentials
            .find_mail_by_login(login_name)
            .await?
            .ok_or_else(|| AuthError::UnknownCredential("login name".into()))?;

        let body = format!(
            "A new password was requested for {}.\n\nNew password: {}\n\nChange it after logging in.",
            login_name, password
        );
        self.mailer.send_mail(&mail, RECOVERY_SUBJECT, &body).await?;

        let password_hash = hash_password(&password)?;
        let updated = self
            .credentials
            .update_password_by_login(login_name, &password_hash)
            .await?;

        info!(login_name, bindings = updated, "Password recovered");
        Ok(updated)
    }
}
