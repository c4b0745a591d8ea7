use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

use crate::{OutboxError, OutboxEvent, OutboxResult, OutboxStatus, StoredEvent};

/// Appends events inside the caller's transaction.
///
/// The writer never opens or commits a transaction itself; the event becomes visible to the
/// publisher exactly when the business write does.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxWriter;

impl OutboxWriter {
    pub fn new() -> Self {
        Self
    }

    /// Whether `(id, origin)` is already in the outbox, seen from inside `tx`.
    pub async fn contains(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        origin: &str,
    ) -> OutboxResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM outbox_events WHERE id = $1 AND origin = $2)",
        )
        .bind(id)
        .bind(origin)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    /// Insert `event` with status `RECEIVED`.
    ///
    /// # Errors
    ///
    /// - [`OutboxError::DuplicateEvent`] when `(id, origin)` already exists. The statement
    ///   uses `ON CONFLICT DO NOTHING`, so the transaction is still usable afterwards.
    /// - [`OutboxError::InvalidEvent`] when the event fails [`OutboxEvent::validate`].
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()> {
        event.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO outbox_events (
                id,
                origin,
                event_type,
                routing_key,
                payload,
                occurred_at,
                status
            ) VALUES ($1, $2, $3, $4, $5, $6, 'RECEIVED')
            ON CONFLICT (id, origin) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(&event.origin)
        .bind(&event.event_type)
        .bind(&event.routing_key)
        .bind(&event.payload)
        .bind(event.timestamp)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                event_id = %event.id,
                origin = %event.origin,
                "Outbox event already present"
            );
            return Err(OutboxError::DuplicateEvent {
                id: event.id.clone(),
                origin: event.origin.clone(),
            });
        }

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            routing_key = %event.routing_key,
            "Event appended to outbox"
        );

        Ok(())
    }
}

/// Read/update side of the outbox used by the publisher.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest `RECEIVED` events first, at most `limit`.
    async fn fetch_pending(&self, limit: i64) -> OutboxResult<Vec<StoredEvent>>;

    async fn mark_sent(&self, event: &OutboxEvent) -> OutboxResult<()>;

    /// Record a delivery failure. `FAILED` is terminal for the publisher.
    async fn mark_failed(&self, event: &OutboxEvent, error: &str) -> OutboxResult<()>;

    /// Pending count and age in seconds of the oldest pending event (0 if none).
    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;
}

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Move `FAILED` events produced since `ts` back to `RECEIVED` so the publisher
    /// delivers them again. Operator action; consumers de-duplicate the replay.
    pub async fn requeue_failed(&self, ts: DateTime<Utc>) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'RECEIVED',
                last_error = NULL,
                updated_at = NOW()
            WHERE status = 'FAILED'
              AND occurred_at >= $1
            "#,
        )
        .bind(ts)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    /// Requeue a single event regardless of its status.
    pub async fn requeue(&self, id: &str, origin: &str) -> OutboxResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'RECEIVED',
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND origin = $2
            "#,
        )
        .bind(id)
        .bind(origin)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound {
                id: id.to_string(),
                origin: origin.to_string(),
            });
        }
        Ok(())
    }

    /// Look up one event by key.
    pub async fn find(&self, id: &str, origin: &str) -> OutboxResult<Option<StoredEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, origin, event_type, routing_key, payload, occurred_at,
                   status, attempts, last_error
            FROM outbox_events
            WHERE id = $1 AND origin = $2
            "#,
        )
        .bind(id)
        .bind(origin)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| stored_event_from_row(&r)).transpose()
    }

    /// Row counts per status.
    pub async fn status_counts(&self) -> OutboxResult<Vec<(OutboxStatus, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*)::BIGINT AS total
            FROM outbox_events
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> OutboxResult<(OutboxStatus, i64)> {
                let status: String = row.try_get("status")?;
                Ok((status.parse()?, row.try_get("total")?))
            })
            .collect()
    }

    async fn set_status(
        &self,
        event: &OutboxEvent,
        status: OutboxStatus,
        error: Option<&str>,
    ) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = $3,
                attempts = attempts + 1,
                last_error = $4,
                updated_at = NOW()
            WHERE id = $1 AND origin = $2
            "#,
        )
        .bind(&event.id)
        .bind(&event.origin)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(
                event_id = %event.id,
                origin = %event.origin,
                status = %status,
                "Event not found when updating status"
            );
            return Err(OutboxError::EventNotFound {
                id: event.id.clone(),
                origin: event.origin.clone(),
            });
        }

        Ok(())
    }
}

fn stored_event_from_row(row: &PgRow) -> OutboxResult<StoredEvent> {
    let status: String = row.try_get("status")?;
    Ok(StoredEvent {
        event: OutboxEvent {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            routing_key: row.try_get("routing_key")?,
            origin: row.try_get("origin")?,
            timestamp: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        },
        status: status.parse()?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
    })
}

#[async_trait]
impl OutboxStore for SqlxOutboxRepository {
    async fn fetch_pending(&self, limit: i64) -> OutboxResult<Vec<StoredEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, origin, event_type, routing_key, payload, occurred_at,
                   status, attempts, last_error
            FROM outbox_events
            WHERE status = 'RECEIVED'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .iter()
            .map(stored_event_from_row)
            .collect::<OutboxResult<Vec<_>>>()?;

        debug!(count = events.len(), "Fetched pending outbox events");

        Ok(events)
    }

    async fn mark_sent(&self, event: &OutboxEvent) -> OutboxResult<()> {
        self.set_status(event, OutboxStatus::Sent, None).await?;
        debug!(event_id = %event.id, "Event marked as sent");
        Ok(())
    }

    async fn mark_failed(&self, event: &OutboxEvent, error: &str) -> OutboxResult<()> {
        self.set_status(event, OutboxStatus::Failed, Some(error))
            .await?;
        warn!(
            event_id = %event.id,
            error = %error,
            "Event marked as failed"
        );
        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM outbox_events
            WHERE status = 'RECEIVED'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((rec.try_get("pending")?, rec.try_get("age_seconds")?))
    }
}
