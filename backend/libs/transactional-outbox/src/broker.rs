//! AMQP 0-9-1 adapter: connection, topology and a confirming publisher.

use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use resilience::{with_timeout_result, TimeoutError};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{EventPublisher, OutboxError, OutboxEvent, OutboxResult};

const PERSISTENT: u8 = 2;

/// An open broker connection.
pub struct AmqpBroker {
    connection: Connection,
}

impl fmt::Debug for AmqpBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpBroker")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl AmqpBroker {
    pub async fn connect(url: &str) -> OutboxResult<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| OutboxError::BrokerUnavailable(e.to_string()))?;

        info!("Connected to AMQP broker");
        Ok(Self { connection })
    }

    pub async fn channel(&self) -> OutboxResult<Channel> {
        Ok(self.connection.create_channel().await?)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "shutdown").await {
            debug!(error = %e, "AMQP connection close failed");
        }
    }
}

/// A queue and the routing key it is bound with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
}

/// Exchanges and queues an application expects to exist.
///
/// Declaring is idempotent, so every (re)connect declares the whole topology again.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: String,
    pub dead_letter_exchange: Option<String>,
    pub bindings: Vec<QueueBinding>,
}

impl Topology {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            dead_letter_exchange: None,
            bindings: Vec::new(),
        }
    }

    /// Route rejected messages of every bound queue to `<queue>.dlq` through `exchange`.
    pub fn with_dead_letter(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }

    pub fn bind(mut self, queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.bindings.push(QueueBinding {
            queue: queue.into(),
            routing_key: routing_key.into(),
        });
        self
    }

    pub fn dead_letter_queue(queue: &str) -> String {
        format!("{queue}.dlq")
    }

    fn queue_arguments(&self, queue: &str) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(dlx) = &self.dead_letter_exchange {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.as_str().into()),
            );
            args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(queue.into()),
            );
        }
        args
    }

    pub async fn declare(&self, channel: &Channel) -> OutboxResult<()> {
        let durable = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                durable,
                FieldTable::default(),
            )
            .await?;

        if let Some(dlx) = &self.dead_letter_exchange {
            channel
                .exchange_declare(dlx, ExchangeKind::Direct, durable, FieldTable::default())
                .await?;
        }

        let durable_queue = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };

        for binding in &self.bindings {
            channel
                .queue_declare(
                    &binding.queue,
                    durable_queue,
                    self.queue_arguments(&binding.queue),
                )
                .await?;
            channel
                .queue_bind(
                    &binding.queue,
                    &self.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            if let Some(dlx) = &self.dead_letter_exchange {
                let dlq = Self::dead_letter_queue(&binding.queue);
                channel
                    .queue_declare(&dlq, durable_queue, FieldTable::default())
                    .await?;
                channel
                    .queue_bind(
                        &dlq,
                        dlx,
                        &binding.queue,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }

            debug!(
                queue = %binding.queue,
                routing_key = %binding.routing_key,
                "Declared queue binding"
            );
        }

        info!(
            exchange = %self.exchange,
            queues = self.bindings.len(),
            "Broker topology declared"
        );
        Ok(())
    }
}

struct Session {
    broker: AmqpBroker,
    channel: Channel,
}

/// Publishes envelopes to a topic exchange with publisher confirms.
///
/// The connection is opened lazily and re-opened after it drops, so a long broker outage
/// only delays delivery.
pub struct AmqpEventPublisher {
    url: String,
    topology: Topology,
    confirm_timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl AmqpEventPublisher {
    pub fn new(url: impl Into<String>, topology: Topology) -> Self {
        Self {
            url: url.into(),
            topology,
            confirm_timeout: Duration::from_secs(10),
            session: Mutex::new(None),
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    async fn channel(&self) -> OutboxResult<Channel> {
        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if current.broker.is_connected() && current.channel.status().connected() {
                return Ok(current.channel.clone());
            }
            warn!("AMQP publisher channel lost, reconnecting");
        }

        let unavailable = |e: OutboxError| match e {
            OutboxError::Broker(inner) => OutboxError::BrokerUnavailable(inner.to_string()),
            other => other,
        };

        let broker = AmqpBroker::connect(&self.url).await?;
        let channel = broker.channel().await.map_err(unavailable)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| OutboxError::BrokerUnavailable(e.to_string()))?;
        self.topology.declare(&channel).await.map_err(unavailable)?;

        *session = Some(Session {
            broker,
            channel: channel.clone(),
        });
        Ok(channel)
    }

    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.broker.close().await;
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
        let channel = self.channel().await?;
        let body = event.to_bytes()?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT)
            .with_message_id(event.id.as_str().into())
            .with_app_id(event.origin.as_str().into());

        let confirmation = with_timeout_result(self.confirm_timeout, async {
            channel
                .basic_publish(
                    &self.topology.exchange,
                    &event.routing_key,
                    BasicPublishOptions::default(),
                    &body,
                    properties,
                )
                .await?
                .await
        })
        .await
        .map_err(|e| match e {
            TimeoutError::Elapsed(after) => {
                OutboxError::PublishFailed(format!("no broker confirmation after {after:?}"))
            }
            TimeoutError::Failed(inner) => OutboxError::BrokerUnavailable(inner.to_string()),
        })?;

        if confirmation.is_nack() {
            return Err(OutboxError::PublishFailed(format!(
                "broker rejected event {}",
                event.id
            )));
        }

        Ok(())
    }
}
