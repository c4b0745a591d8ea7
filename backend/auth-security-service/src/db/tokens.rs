/// Token persistence
///
/// `tokens` holds one row per credential pair. Every overwrite first copies the old row
/// into `token_history` inside the same transaction, under a row lock, so two writers
/// on the same pair serialize and history never skips a record.
use super::TokenStore;
use crate::error::{AuthError, Result};
use crate::models::{CredentialPair, TokenRecord};
use async_trait::async_trait;
use db_pool::acquire_with_metrics;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};

const RECORD_COLUMNS: &str = r#"
    client_key, binding_id, access_token, access_expires_at,
    refresh_token, refresh_expires_at, issued_at
"#;

#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
    service: String,
}

impl PgTokenStore {
    pub fn new(pool: PgPool, service: impl Into<String>) -> Self {
        Self {
            pool,
            service: service.into(),
        }
    }
}

async fn lock_current(
    tx: &mut Transaction<'_, Postgres>,
    client_key: &str,
    binding_id: i64,
) -> Result<Option<(i64, TokenRecord)>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT id, {RECORD_COLUMNS} FROM tokens
        WHERE client_key = $1 AND binding_id = $2
        FOR UPDATE
        "#
    ))
    .bind(client_key)
    .bind(binding_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|row| Ok((row.try_get("id")?, TokenRecord::from_row(&row)?)))
        .transpose()
}

async fn archive(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO token_history ({RECORD_COLUMNS})
        SELECT {RECORD_COLUMNS} FROM tokens WHERE id = $1
        "#
    ))
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn overwrite(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    record: &TokenRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tokens
        SET access_token = $1,
            access_expires_at = $2,
            refresh_token = $3,
            refresh_expires_at = $4,
            issued_at = $5,
            updated_at = NOW()
        WHERE id = $6
        "#,
    )
    .bind(&record.access_token)
    .bind(record.access_expires_at)
    .bind(&record.refresh_token)
    .bind(record.refresh_expires_at)
    .bind(record.issued_at)
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn try_insert(tx: &mut Transaction<'_, Postgres>, record: &TokenRecord) -> Result<bool> {
    let result = sqlx::query(&format!(
        r#"
        INSERT INTO tokens ({RECORD_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (client_key, binding_id) DO NOTHING
        "#
    ))
    .bind(&record.client_key)
    .bind(record.binding_id)
    .bind(&record.access_token)
    .bind(record.access_expires_at)
    .bind(&record.refresh_token)
    .bind(record.refresh_expires_at)
    .bind(record.issued_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn current(&self, pair: &CredentialPair) -> Result<Option<TokenRecord>> {
        let mut conn = acquire_with_metrics(&self.pool, &self.service).await?;
        let record = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM tokens WHERE client_key = $1 AND binding_id = $2"
        ))
        .bind(&pair.client_key)
        .bind(pair.binding_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(record)
    }

    async fn replace(&self, record: &TokenRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // A concurrent first login may insert between our select and insert; the
        // second pass then finds and locks its row.
        for _ in 0..2 {
            if let Some((id, _)) =
                lock_current(&mut tx, &record.client_key, record.binding_id).await?
            {
                archive(&mut tx, id).await?;
                overwrite(&mut tx, id, record).await?;
                tx.commit().await?;
                return Ok(());
            }

            if try_insert(&mut tx, record).await? {
                tx.commit().await?;
                return Ok(());
            }
        }

        Err(AuthError::Unavailable(format!(
            "token row for binding {} kept changing",
            record.binding_id
        )))
    }

    async fn rotate_access(&self, expected: &TokenRecord, next: &TokenRecord) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some((id, stored)) =
            lock_current(&mut tx, &expected.client_key, expected.binding_id).await?
        else {
            return Ok(false);
        };

        if stored.access_token != expected.access_token
            || stored.refresh_token != expected.refresh_token
        {
            return Ok(false);
        }

        archive(&mut tx, id).await?;
        overwrite(&mut tx, id, next).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn history(&self, pair: &CredentialPair) -> Result<Vec<TokenRecord>> {
        let records = sqlx::query_as::<_, TokenRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM token_history
            WHERE client_key = $1 AND binding_id = $2
            ORDER BY issued_at, id
            "#
        ))
        .bind(&pair.client_key)
        .bind(pair.binding_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
