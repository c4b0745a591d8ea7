//! Supervised pool health monitor.

use crate::metrics::{set_health, update_pool_metrics};
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared view of the last health probe result.
#[derive(Debug, Clone)]
pub struct PoolHealth {
    healthy: Arc<AtomicBool>,
}

impl PoolHealth {
    pub fn new(initial: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Record a probe result; returns the previous value.
    fn record(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::Relaxed)
    }
}

/// Spawn a background task that pings the pool every `interval`.
///
/// sqlx re-establishes broken connections on acquire, so the task does not reconnect by
/// itself; it detects outages, reports transitions, and keeps the pool gauges fresh. The
/// task exits when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_health_monitor(
    pool: PgPool,
    service: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (JoinHandle<()>, PoolHealth) {
    let health = PoolHealth::new(true);
    let reported = health.clone();
    set_health(&service, true);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(service = %service, "Database health monitor stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let healthy = match crate::ping(&pool, interval).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(service = %service, error = %e, "Database health probe failed");
                            false
                        }
                    };

                    let was_healthy = health.record(healthy);
                    match (was_healthy, healthy) {
                        (true, false) => warn!(service = %service, "Database marked unhealthy"),
                        (false, true) => info!(service = %service, "Database connection recovered"),
                        _ => debug!(service = %service, healthy, "Database health probe"),
                    }

                    set_health(&service, healthy);
                    update_pool_metrics(&pool, &service);
                }
            }
        }
    });

    (handle, reported)
}
