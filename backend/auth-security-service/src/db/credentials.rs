/// Credential database operations
///
/// The free functions take any executor so registration can run them inside its own
/// transaction; [`PgCredentialStore`] runs them on pooled connections.
use super::CredentialStore;
use crate::error::Result;
use crate::models::{
    ChannelBinding, ChannelType, ClientKey, ClientKeyStatus, Identity, RevokeCommand,
};
use async_trait::async_trait;
use db_pool::acquire_with_metrics;
use sqlx::{postgres::PgRow, PgExecutor, PgPool, Row};

const BINDING_COLUMNS: &str = r#"
    id, identity_id, channel, login_name, password_hash, mail, phone,
    validated, revoked, mfa_required
"#;

pub async fn find_identity<'e>(
    executor: impl PgExecutor<'e>,
    identity_id: i64,
) -> Result<Option<Identity>> {
    let identity = sqlx::query_as::<_, Identity>(
        "SELECT id, revoked, created_at FROM identities WHERE id = $1",
    )
    .bind(identity_id)
    .fetch_optional(executor)
    .await?;

    Ok(identity)
}

/// Create an identity with the next id.
pub async fn insert_identity<'e>(executor: impl PgExecutor<'e>) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>("INSERT INTO identities DEFAULT VALUES RETURNING id")
        .fetch_one(executor)
        .await?;

    Ok(id)
}

pub async fn find_channel_type<'e>(
    executor: impl PgExecutor<'e>,
    channel: &str,
) -> Result<Option<ChannelType>> {
    let channel_type = sqlx::query_as::<_, ChannelType>(
        "SELECT name, revoked FROM channel_types WHERE name = $1",
    )
    .bind(channel)
    .fetch_optional(executor)
    .await?;

    Ok(channel_type)
}

pub async fn find_binding<'e>(
    executor: impl PgExecutor<'e>,
    identity_id: i64,
    channel: &str,
) -> Result<Option<ChannelBinding>> {
    let binding = sqlx::query_as::<_, ChannelBinding>(&format!(
        "SELECT {BINDING_COLUMNS} FROM channel_bindings WHERE identity_id = $1 AND channel = $2"
    ))
    .bind(identity_id)
    .bind(channel)
    .fetch_optional(executor)
    .await?;

    Ok(binding)
}

pub async fn find_binding_by_login<'e>(
    executor: impl PgExecutor<'e>,
    channel: &str,
    login_name: &str,
) -> Result<Option<ChannelBinding>> {
    let binding = sqlx::query_as::<_, ChannelBinding>(&format!(
        "SELECT {BINDING_COLUMNS} FROM channel_bindings WHERE channel = $1 AND login_name = $2"
    ))
    .bind(channel)
    .bind(login_name)
    .fetch_optional(executor)
    .await?;

    Ok(binding)
}

/// Fields of a binding created at registration.
#[derive(Debug, Clone, Copy)]
pub struct NewBinding<'a> {
    pub identity_id: i64,
    pub channel: &'a str,
    pub login_name: &'a str,
    pub password_hash: &'a str,
    pub mail: Option<&'a str>,
    pub phone: Option<&'a str>,
}

/// Insert a validated binding. Returns the binding id.
pub async fn insert_binding<'e>(
    executor: impl PgExecutor<'e>,
    binding: NewBinding<'_>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO channel_bindings (
            identity_id, channel, login_name, password_hash, mail, phone, validated
        ) VALUES ($1, $2, $3, $4, $5, $6, TRUE)
        RETURNING id
        "#,
    )
    .bind(binding.identity_id)
    .bind(binding.channel)
    .bind(binding.login_name)
    .bind(binding.password_hash)
    .bind(binding.mail)
    .bind(binding.phone)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

fn client_key_from_row(row: &PgRow) -> Result<ClientKey> {
    let status: String = row.try_get("status")?;
    Ok(ClientKey {
        key: row.try_get("key")?,
        expires_at: row.try_get("expires_at")?,
        superuser: row.try_get("superuser")?,
        mfa_required: row.try_get("mfa_required")?,
        access_token_minutes: row.try_get("access_token_minutes")?,
        status: status
            .parse::<ClientKeyStatus>()
            .map_err(crate::error::AuthError::Database)?,
    })
}

/// PostgreSQL-backed [`CredentialStore`].
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
    service: String,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, service: impl Into<String>) -> Self {
        Self {
            pool,
            service: service.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_identity(&self, identity_id: i64) -> Result<Option<Identity>> {
        let mut conn = acquire_with_metrics(&self.pool, &self.service).await?;
        find_identity(&mut *conn, identity_id).await
    }

    async fn find_channel_type(&self, channel: &str) -> Result<Option<ChannelType>> {
        let mut conn = acquire_with_metrics(&self.pool, &self.service).await?;
        find_channel_type(&mut *conn, channel).await
    }

    async fn find_binding(
        &self,
        identity_id: i64,
        channel: &str,
    ) -> Result<Option<ChannelBinding>> {
        let mut conn = acquire_with_metrics(&self.pool, &self.service).await?;
        find_binding(&mut *conn, identity_id, channel).await
    }

    async fn find_binding_by_login(
        &self,
        channel: &str,
        login_name: &str,
    ) -> Result<Option<ChannelBinding>> {
        let mut conn = acquire_with_metrics(&self.pool, &self.service).await?;
        find_binding_by_login(&mut *conn, channel, login_name).await
    }

    async fn find_client_key(&self, key: &str) -> Result<Option<ClientKey>> {
        let mut conn = acquire_with_metrics(&self.pool, &self.service).await?;
        let row = sqlx::query(
            r#"
            SELECT key, expires_at, superuser, mfa_required, access_token_minutes, status
            FROM client_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| client_key_from_row(&r)).transpose()
    }

    async fn find_mail_by_login(&self, login_name: &str) -> Result<Option<String>> {
        let mail = sqlx::query_scalar::<_, String>(
            r#"
            SELECT mail FROM channel_bindings
            WHERE login_name = $1 AND mail IS NOT NULL AND mail <> ''
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(login_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mail)
    }

    async fn update_password_by_login(
        &self,
        login_name: &str,
        password_hash: &str,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE channel_bindings
            SET password_hash = $1, updated_at = NOW()
            WHERE login_name = $2
            "#,
        )
        .bind(password_hash)
        .bind(login_name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn apply_revocation(&self, command: &RevokeCommand) -> Result<u64> {
        let revoked = command.access().revoked();

        let result = match command {
            RevokeCommand::Identity { identity_id, .. } => {
                sqlx::query("UPDATE identities SET revoked = $1 WHERE id = $2")
                    .bind(revoked)
                    .bind(identity_id)
                    .execute(&self.pool)
                    .await?
            }
            RevokeCommand::ChannelType { channel, .. } => {
                sqlx::query("UPDATE channel_types SET revoked = $1 WHERE name = $2")
                    .bind(revoked)
                    .bind(channel)
                    .execute(&self.pool)
                    .await?
            }
            RevokeCommand::Binding {
                identity_id,
                channel,
                ..
            } => {
                sqlx::query(
                    r#"
                    UPDATE channel_bindings
                    SET revoked = $1, updated_at = NOW()
                    WHERE identity_id = $2 AND channel = $3
                    "#,
                )
                .bind(revoked)
                .bind(identity_id)
                .bind(channel)
                .execute(&self.pool)
                .await?
            }
            RevokeCommand::ClientKey {
                key, expires_at, ..
            } => {
                let status = if revoked {
                    ClientKeyStatus::Inactive
                } else {
                    ClientKeyStatus::Active
                };
                sqlx::query(
                    r#"
                    UPDATE client_keys
                    SET status = $1, expires_at = COALESCE($2, expires_at)
                    WHERE key = $3
                    "#,
                )
                .bind(status.as_str())
                .bind(expires_at)
                .bind(key)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn create_channel_type(&self, channel: &str) -> Result<()> {
        sqlx::query("INSERT INTO channel_types (name) VALUES ($1)")
            .bind(channel)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
