/// Auth Security Service Main Entry Point
///
/// Starts:
/// - PostgreSQL connection pool, migrations and pool health monitor
/// - Outbox publisher (background task)
/// - `user.created` consumer with broker reconnect supervision
/// - Processed-event cleanup (background task)
///
/// and runs until Ctrl+C or SIGTERM.
use anyhow::{Context, Result};
use auth_security_service::{
    config::Settings,
    consumers::{spawn_event_consumer, SupervisorConfig, UserCreatedHandler},
    db::{PgCredentialStore, PgMfaSecretStore, PgTokenStore},
    services::{
        MfaChallengeEngine, PasswordRecoveryService, SessionService, SmtpMailer, TokenManager,
        UserRegistrationService,
    },
    SERVICE_NAME,
};
use crypto_core::jwt::JwtKeys;
use idempotent_consumer::{ConsumerConfig, EventRouter, IdempotencyGuard, IdempotentHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use transactional_outbox::{
    metrics::OutboxMetrics, AmqpEventPublisher, OutboxPublisher, PublisherConfig,
    SqlxOutboxRepository, Topology,
};

const CONFIG_UPDATES_QUEUE: &str = "config_updates_q";
const CONFIG_UPDATED_KEY: &str = "config.updated";
const PROCESSED_EVENT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const PROCESSED_EVENT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "auth_security_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Auth Security Service");

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let jwt_keys = Arc::new(
        JwtKeys::new(
            settings.jwt.access_secret.as_bytes(),
            settings.jwt.refresh_secret.as_bytes(),
        )
        .context("Failed to initialize JWT keys")?,
    );
    info!("JWT keys initialized");

    // Initialize database connection pool
    settings.database.log_config();
    let db_pool = db_pool::create_pool(&settings.database)
        .await
        .context("Failed to connect to PostgreSQL")?;

    // Run database migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (health_handle, pool_health) = db_pool::spawn_health_monitor(
        db_pool.clone(),
        SERVICE_NAME.to_string(),
        Duration::from_secs(settings.database.health_interval_secs),
        shutdown_rx.clone(),
    );

    // Request-path services. No inbound transport is mounted here; the embedding
    // gateway owns routing and calls these directly.
    let credentials = Arc::new(PgCredentialStore::new(db_pool.clone(), SERVICE_NAME));
    let _sessions = SessionService::new(
        credentials.clone(),
        MfaChallengeEngine::new(
            Arc::new(PgMfaSecretStore::new(db_pool.clone())),
            settings.mfa.issuer.clone(),
        ),
        TokenManager::new(
            Arc::new(PgTokenStore::new(db_pool.clone(), SERVICE_NAME)),
            jwt_keys,
            chrono::Duration::minutes(settings.jwt.refresh_token_minutes),
        ),
    );

    let mailer = SmtpMailer::new(&settings.email).context("Failed to initialize mailer")?;
    if mailer.is_enabled() {
        info!("Mailer initialized with SMTP");
    } else {
        info!("Mailer running in no-op mode (SMTP not configured)");
    }
    let _recovery = PasswordRecoveryService::new(credentials, Arc::new(mailer));

    let registration = Arc::new(UserRegistrationService::new(
        db_pool.clone(),
        settings.outbox.origin.clone(),
        settings.outbox.routing_key.clone(),
    ));

    // Broker topology shared by the publisher and the consumers
    let topology = Topology::new(settings.broker.exchange.clone())
        .with_dead_letter(settings.broker.dead_letter_exchange.clone())
        .bind(
            settings.broker.user_created_queue.clone(),
            settings.outbox.routing_key.clone(),
        )
        .bind(CONFIG_UPDATES_QUEUE, CONFIG_UPDATED_KEY);

    // Spawn outbox publisher (background task)
    let publisher = OutboxPublisher::new(
        Arc::new(SqlxOutboxRepository::new(db_pool.clone())),
        Arc::new(AmqpEventPublisher::new(
            settings.broker.url.clone(),
            topology.clone(),
        )),
        PublisherConfig {
            batch_size: settings.outbox.batch_size,
            poll_interval: settings.outbox.poll_interval,
            ..PublisherConfig::default()
        },
    );
    let publisher = match OutboxMetrics::new(SERVICE_NAME) {
        Ok(metrics) => publisher.with_metrics(metrics),
        Err(e) => {
            warn!(error = %e, "Outbox metrics unavailable");
            publisher
        }
    };
    let publisher_shutdown = shutdown_rx.clone();
    let publisher_handle = tokio::spawn(async move { publisher.run(publisher_shutdown).await });
    info!(origin = %settings.outbox.origin, "Outbox publisher started");

    // Idempotent user.created consumer
    let guard = IdempotencyGuard::new(db_pool.clone(), PROCESSED_EVENT_RETENTION);
    let cleanup_handle = guard.spawn_cleanup(PROCESSED_EVENT_CLEANUP_INTERVAL, shutdown_rx.clone());

    let router = Arc::new(EventRouter::new().register(
        settings.outbox.routing_key.clone(),
        Arc::new(IdempotentHandler::new(
            UserCreatedHandler::new(registration),
            Arc::new(guard),
        )),
    ));

    let mut consumer_config = SupervisorConfig::new(
        settings.broker.url.clone(),
        settings.broker.user_created_queue.clone(),
        topology,
    )
    .with_db_health(pool_health);
    consumer_config.consumer = ConsumerConfig {
        prefetch: settings.broker.prefetch,
        consumer_tag: format!("{}-user-created", settings.outbox.origin),
        ..ConsumerConfig::default()
    };
    let consumer_handle = spawn_event_consumer(consumer_config, router, shutdown_rx);

    shutdown_signal().await;

    // Publisher finishes its batch, consumer drains in-flight handlers
    if shutdown_tx.send(true).is_err() {
        warn!("All background tasks already stopped");
    }

    for (name, handle) in [
        ("outbox publisher", publisher_handle),
        ("event consumer", consumer_handle),
        ("processed event cleanup", cleanup_handle),
        ("pool health monitor", health_handle),
    ] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Background task panicked");
        }
    }

    db_pool.close().await;
    info!("Auth security service shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
