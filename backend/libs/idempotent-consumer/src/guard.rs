use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{IdempotencyError, IdempotencyResult};

/// Longest accepted event id or origin.
pub const MAX_KEY_LEN: usize = 255;

/// Record of `(event_id, origin)` pairs a consumer has already handled.
#[async_trait]
pub trait ProcessedLog: Send + Sync {
    async fn is_processed(&self, event_id: &str, origin: &str) -> IdempotencyResult<bool>;

    /// Returns `false` when the pair was already recorded.
    async fn mark_processed(
        &self,
        event_id: &str,
        origin: &str,
        metadata: Option<serde_json::Value>,
    ) -> IdempotencyResult<bool>;
}

/// PostgreSQL-backed idempotency guard.
///
/// Events are keyed by `(event_id, origin)`, matching the outbox primary key, so two
/// producers reusing an id never shadow each other. Cheap to clone and safe to share
/// across tasks.
#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
    retention_duration: Duration,
}

impl IdempotencyGuard {
    /// Create a guard keeping processed keys for `retention_duration`.
    ///
    /// Retention must exceed the longest window in which a producer can replay an event
    /// (including manual outbox requeues), otherwise a late replay runs twice.
    pub fn new(pool: PgPool, retention_duration: Duration) -> Self {
        Self {
            pool,
            retention_duration,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention_duration
    }

    /// Delete keys older than the retention window. Returns the number of rows removed.
    pub async fn cleanup_old_events(&self) -> IdempotencyResult<u64> {
        let retention = chrono::Duration::from_std(self.retention_duration).map_err(|e| {
            IdempotencyError::InvalidConfig(format!("Invalid retention duration: {}", e))
        })?;
        let cutoff_time = Utc::now() - retention;

        let result = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE processed_at < $1
            "#,
        )
        .bind(cutoff_time)
        .execute(&self.pool)
        .await?;

        let deleted_count = result.rows_affected();

        info!(
            deleted_count = deleted_count,
            cutoff_time = %cutoff_time,
            retention_days = self.retention_duration.as_secs() / 86400,
            "Cleaned up old processed events"
        );

        Ok(deleted_count)
    }

    /// Run [`cleanup_old_events`](Self::cleanup_old_events) every `interval` until shutdown.
    pub fn spawn_cleanup(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let guard = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = guard.cleanup_old_events().await {
                            error!(error = %e, "Processed event cleanup failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Processed event cleanup stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Validate an event id or origin: non-empty, at most 255 characters.
    pub fn validate_key(kind: &str, value: &str) -> IdempotencyResult<()> {
        if value.is_empty() {
            return Err(IdempotencyError::InvalidEventId(format!(
                "{} cannot be empty",
                kind
            )));
        }

        if value.len() > MAX_KEY_LEN {
            return Err(IdempotencyError::InvalidEventId(format!(
                "{} too long: {} characters (max {})",
                kind,
                value.len(),
                MAX_KEY_LEN
            )));
        }

        Ok(())
    }

    fn validate(event_id: &str, origin: &str) -> IdempotencyResult<()> {
        Self::validate_key("Event ID", event_id)?;
        Self::validate_key("Origin", origin)
    }
}

#[async_trait]
impl ProcessedLog for IdempotencyGuard {
    async fn is_processed(&self, event_id: &str, origin: &str) -> IdempotencyResult<bool> {
        Self::validate(event_id, origin)?;

        let result = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events WHERE event_id = $1 AND origin = $2
            ) AS exists
            "#,
        )
        .bind(event_id)
        .bind(origin)
        .fetch_one(&self.pool)
        .await?;

        let exists: bool = result.try_get("exists")?;

        if exists {
            debug!(event_id = %event_id, origin = %origin, "Event already processed");
        }

        Ok(exists)
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        origin: &str,
        metadata: Option<serde_json::Value>,
    ) -> IdempotencyResult<bool> {
        Self::validate(event_id, origin)?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, origin, metadata, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (event_id, origin) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(origin)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        let was_inserted = result.rows_affected() > 0;

        if was_inserted {
            debug!(
                event_id = %event_id,
                origin = %origin,
                "Event marked as processed"
            );
        } else {
            debug!(
                event_id = %event_id,
                origin = %origin,
                "Event already marked as processed (duplicate)"
            );
        }

        Ok(was_inserted)
    }
}
