use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions,
    },
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::{Disposition, EventRouter, IdempotencyResult};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Unacknowledged deliveries in flight, also the handler concurrency.
    pub prefetch: u16,
    pub consumer_tag: String,
    /// Pause before a transient failure is handed back to the broker.
    pub requeue_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: 50,
            consumer_tag: String::new(),
            requeue_delay: Duration::from_secs(1),
        }
    }
}

/// Why [`EventConsumer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    Shutdown,
    /// The delivery stream ended without a shutdown request; reconnect and start again.
    StreamClosed,
}

pub struct EventConsumer {
    config: ConsumerConfig,
    router: Arc<EventRouter>,
}

impl EventConsumer {
    pub fn new(config: ConsumerConfig, router: Arc<EventRouter>) -> Self {
        Self { config, router }
    }

    /// Consume `queue` on `channel` until shutdown or until the channel goes away.
    ///
    /// Up to `prefetch` deliveries are handled concurrently. Each is acked or nacked once
    /// its handler finishes; deliveries still unacknowledged at shutdown are redelivered
    /// by the broker.
    pub async fn run(
        &self,
        channel: &Channel,
        queue: &str,
        shutdown: watch::Receiver<bool>,
    ) -> IdempotencyResult<ConsumerExit> {
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let tag = consumer.tag();

        info!(
            queue = %queue,
            consumer_tag = %tag.as_str(),
            prefetch = self.config.prefetch,
            "Consumer started"
        );

        let span = tracing::info_span!("consumer", queue = %queue);
        consumer
            .take_until(wait_for_shutdown(shutdown.clone()))
            .for_each_concurrent(usize::from(self.config.prefetch.max(1)), |delivery| {
                let router = self.router.clone();
                let requeue_delay = self.config.requeue_delay;
                async move {
                    match delivery {
                        Ok(delivery) => handle_delivery(&router, delivery, requeue_delay).await,
                        Err(e) => error!(error = %e, "Consumer delivery error"),
                    }
                }
            })
            .instrument(span)
            .await;

        if stop_requested(&shutdown) {
            if channel.status().connected() {
                if let Err(e) = channel
                    .basic_cancel(tag.as_str(), BasicCancelOptions::default())
                    .await
                {
                    debug!(error = %e, "Consumer cancel failed");
                }
            }
            info!(queue = %queue, "Consumer stopped");
            Ok(ConsumerExit::Shutdown)
        } else {
            warn!(queue = %queue, "Consumer stream closed");
            Ok(ConsumerExit::StreamClosed)
        }
    }
}

async fn handle_delivery(router: &EventRouter, delivery: Delivery, requeue_delay: Duration) {
    let disposition = router.dispatch(&delivery.data).await;

    let result = match disposition {
        Disposition::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
        Disposition::Reject { reason } => {
            warn!(
                delivery_tag = delivery.delivery_tag,
                reason = %reason,
                "Rejecting message to dead letter queue"
            );
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                })
                .await
        }
        Disposition::Requeue { reason } => {
            warn!(
                delivery_tag = delivery.delivery_tag,
                reason = %reason,
                "Requeueing message"
            );
            tokio::time::sleep(requeue_delay).await;
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
        }
    };

    if let Err(e) = result {
        // the broker redelivers unacknowledged messages once the channel closes
        error!(delivery_tag = delivery.delivery_tag, error = %e, "Failed to settle delivery");
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Resolves once `true` is sent or the sender is dropped.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
