use super::MfaSecretStore;
use crate::error::Result;
use crate::models::CredentialPair;
use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgMfaSecretStore {
    pool: PgPool,
}

impl PgMfaSecretStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MfaSecretStore for PgMfaSecretStore {
    async fn find(&self, pair: &CredentialPair) -> Result<Option<String>> {
        let secret = sqlx::query_scalar::<_, String>(
            "SELECT secret FROM mfa_secrets WHERE client_key = $1 AND binding_id = $2",
        )
        .bind(&pair.client_key)
        .bind(pair.binding_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(secret)
    }

    async fn get_or_create(
        &self,
        pair: &CredentialPair,
        candidate: &str,
    ) -> Result<(String, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO mfa_secrets (client_key, binding_id, secret)
            VALUES ($1, $2, $3)
            ON CONFLICT (client_key, binding_id) DO NOTHING
            "#,
        )
        .bind(&pair.client_key)
        .bind(pair.binding_id)
        .bind(candidate)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            return Ok((candidate.to_string(), true));
        }

        // Lost to an earlier or concurrent insert; its secret wins.
        let secret = sqlx::query_scalar::<_, String>(
            "SELECT secret FROM mfa_secrets WHERE client_key = $1 AND binding_id = $2",
        )
        .bind(&pair.client_key)
        .bind(pair.binding_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((secret, false))
    }
}
