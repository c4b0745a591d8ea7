/// Event consumers and their broker supervision
///
/// Each subscribed queue runs one [`EventConsumer`] inside a supervisor loop: connect,
/// declare the topology, consume until the stream ends, then reconnect with exponential
/// backoff. No connection is attempted while the database pool is reported unhealthy,
/// since every handler would fail transiently. Shutdown stops the loop at any point.
pub mod user_created;

pub use user_created::UserCreatedHandler;

use db_pool::PoolHealth;
use idempotent_consumer::{ConsumerConfig, ConsumerExit, EventConsumer, EventRouter};
use resilience::{with_retry_if, with_timeout_result, Backoff, RetryConfig, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use transactional_outbox::{AmqpBroker, OutboxError, Topology};

#[derive(Clone)]
pub struct SupervisorConfig {
    pub url: String,
    pub queue: String,
    pub topology: Topology,
    pub consumer: ConsumerConfig,
    /// Pause between consume sessions.
    pub reconnect: RetryConfig,
    /// Attempts within one session before it counts as failed.
    pub connect_retry: RetryConfig,
    pub connect_timeout: Duration,
    pub db_health: Option<PoolHealth>,
}

impl SupervisorConfig {
    pub fn new(url: impl Into<String>, queue: impl Into<String>, topology: Topology) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            topology,
            consumer: ConsumerConfig::default(),
            reconnect: RetryConfig {
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(30),
                ..RetryConfig::default()
            },
            connect_retry: RetryConfig::default(),
            connect_timeout: Duration::from_secs(10),
            db_health: None,
        }
    }

    pub fn with_db_health(mut self, health: PoolHealth) -> Self {
        self.db_health = Some(health);
        self
    }

    fn database_ready(&self) -> bool {
        self.db_health.as_ref().map_or(true, PoolHealth::is_healthy)
    }
}

fn retryable_connect_error(err: &TimeoutError<OutboxError>) -> bool {
    match err {
        TimeoutError::Elapsed(_) => true,
        TimeoutError::Failed(e) => e.is_transient(),
    }
}

/// Spawn the supervised consumer for `config.queue`.
pub fn spawn_event_consumer(
    config: SupervisorConfig,
    router: Arc<EventRouter>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let span = info_span!("event_consumer", queue = %config.queue);

    tokio::spawn(
        async move {
            let consumer = EventConsumer::new(config.consumer.clone(), router);
            let mut backoff = Backoff::new(config.reconnect.clone());

            info!("Event consumer supervisor starting");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                if !config.database_ready() {
                    warn!("Database unhealthy, delaying consumer start");
                } else {
                    match consume_once(&consumer, &config, shutdown.clone()).await {
                        Ok(ConsumerExit::Shutdown) => break,
                        Ok(ConsumerExit::StreamClosed) => {
                            warn!("Delivery stream closed, reconnecting");
                            backoff.reset();
                        }
                        Err(e) => {
                            error!(error = %e, "Event consumer failed");
                        }
                    }
                }

                let delay = backoff.next_delay();
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            info!("Event consumer supervisor stopped");
        }
        .instrument(span),
    )
}

async fn consume_once(
    consumer: &EventConsumer,
    config: &SupervisorConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<ConsumerExit> {
    let broker = with_retry_if(
        config.connect_retry.clone(),
        || with_timeout_result(config.connect_timeout, AmqpBroker::connect(&config.url)),
        retryable_connect_error,
    )
    .await
    .map_err(|e| e.into_inner())?;
    let channel = broker.channel().await?;
    config.topology.declare(&channel).await?;

    let exit = consumer.run(&channel, &config.queue, shutdown).await;
    broker.close().await;
    Ok(exit?)
}
