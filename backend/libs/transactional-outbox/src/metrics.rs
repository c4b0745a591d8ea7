use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub sent: IntCounter,
    pub failed: IntCounter,
}

impl OutboxMetrics {
    /// Create the collectors and register them on the default registry.
    ///
    /// A registration conflict (e.g. a second publisher in the same process) is logged and
    /// the collectors still work, just unexported.
    pub fn new(service: &str) -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("service", service.to_string())
        };

        let pending = IntGauge::with_opts(opts(
            "outbox_pending_count",
            "Number of RECEIVED outbox events waiting for delivery",
        ))?;
        let oldest_pending_age_seconds = IntGauge::with_opts(opts(
            "outbox_oldest_pending_age_seconds",
            "Age in seconds of the oldest pending outbox event",
        ))?;
        let sent = IntCounter::with_opts(opts(
            "outbox_sent_total",
            "Total number of outbox events marked as SENT",
        ))?;
        let failed = IntCounter::with_opts(opts(
            "outbox_failed_total",
            "Total number of outbox events marked as FAILED",
        ))?;

        let registry = prometheus::default_registry();
        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(oldest_pending_age_seconds.clone()),
            Box::new(sent.clone()),
            Box::new(failed.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register outbox metric: {}", e);
            }
        }

        Ok(Self {
            pending,
            oldest_pending_age_seconds,
            sent,
            failed,
        })
    }
}
