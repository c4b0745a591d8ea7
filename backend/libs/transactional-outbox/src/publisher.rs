use async_trait::async_trait;
use resilience::{Backoff, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::metrics::OutboxMetrics;
use crate::{OutboxError, OutboxEvent, OutboxResult, OutboxStore};

/// Publisher trait for delivering events to a message broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver one event.
    ///
    /// Return [`OutboxError::BrokerUnavailable`] when nothing could be sent because there is
    /// no broker connection; the publisher then leaves the event pending instead of
    /// marking it failed.
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()>;
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Events fetched per drain
    pub batch_size: i64,
    /// Pause between drains when the outbox is empty or only partially filled a batch
    pub poll_interval: Duration,
    /// Backoff schedule after store or broker outages
    pub error_backoff: RetryConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_millis(1500),
            error_backoff: RetryConfig {
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(30),
                ..RetryConfig::default()
            },
        }
    }
}

/// Result of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Background process that drains the outbox into the broker.
pub struct OutboxPublisher<S: OutboxStore, P: EventPublisher> {
    store: Arc<S>,
    publisher: Arc<P>,
    config: PublisherConfig,
    metrics: Option<OutboxMetrics>,
}

impl<S: OutboxStore, P: EventPublisher> OutboxPublisher<S, P> {
    pub fn new(store: Arc<S>, publisher: Arc<P>, config: PublisherConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Deliver up to one batch of pending events.
    ///
    /// Each event is published then marked `SENT`, or marked `FAILED` when the broker
    /// rejects it; a rejected event does not stop the rest of the batch. The drain stops
    /// early and returns an error only when the store fails or the broker is unreachable,
    /// in which case the undelivered events stay `RECEIVED`.
    pub async fn drain_once(&self) -> OutboxResult<DrainReport> {
        let pending = self.store.fetch_pending(self.config.batch_size).await?;
        let mut report = DrainReport {
            fetched: pending.len(),
            ..DrainReport::default()
        };

        for stored in pending {
            let event = &stored.event;

            match self.publisher.publish(event).await {
                Ok(()) => {
                    // Delivered but not marked: the next drain re-sends it.
                    self.store.mark_sent(event).await?;
                    report.sent += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.sent.inc();
                    }
                    debug!(
                        event_id = %event.id,
                        routing_key = %event.routing_key,
                        "Event published"
                    );
                }
                Err(e @ OutboxError::BrokerUnavailable(_)) => {
                    warn!(
                        event_id = %event.id,
                        sent = report.sent,
                        "Broker unavailable, stopping drain"
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts = stored.attempts,
                        error = %e,
                        "Failed to publish event"
                    );
                    self.store.mark_failed(event, &e.to_string()).await?;
                    report.failed += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.failed.inc();
                    }
                }
            }
        }

        Ok(report)
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// A drain in progress is always finished before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let span = info_span!("outbox_publisher", batch_size = self.config.batch_size);
        async move {
            info!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                "Outbox publisher starting"
            );

            let mut backoff = Backoff::new(self.config.error_backoff.clone());

            loop {
                if *shutdown.borrow() {
                    break;
                }

                let pause = match self.drain_once().await {
                    Ok(report) => {
                        backoff.reset();
                        if report.fetched > 0 {
                            info!(
                                sent = report.sent,
                                failed = report.failed,
                                "Drained outbox batch"
                            );
                        }
                        if report.fetched as i64 >= self.config.batch_size {
                            // Backlog: go again without waiting.
                            Duration::ZERO
                        } else {
                            self.config.poll_interval
                        }
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(
                            error = %e,
                            transient = e.is_transient(),
                            retry_in_ms = delay.as_millis() as u64,
                            "Outbox drain interrupted"
                        );
                        delay
                    }
                };

                self.refresh_metrics().await;

                if pause.is_zero() {
                    continue;
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            info!("Outbox publisher stopped");
        }
        .instrument(span)
        .await
    }

    async fn refresh_metrics(&self) {
        if let Some(metrics) = &self.metrics {
            if let Ok((pending, age)) = self.store.pending_stats().await {
                metrics.pending.set(pending);
                metrics.oldest_pending_age_seconds.set(age);
            }
        }
    }
}
