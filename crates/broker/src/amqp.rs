//! RabbitMQ transport built on `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tokio::sync::watch;

use crate::{
    Result,
    transport::{Acknowledger, Channel, Delivery, DeliveryStream, Transport},
};

/// Persistent delivery mode for published messages.
const PERSISTENT: u8 = 2;

/// Connects to an AMQP 0-9-1 broker.
#[derive(Debug, Clone)]
pub struct AmqpTransport {
    uri: String,
}

impl AmqpTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self) -> Result<Arc<dyn Channel>> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;

        let closed = ClosedFlag::default();
        let on_error = closed.clone();
        connection.on_error(move |err| {
            tracing::error!(error = %err, "AMQP connection error");
            on_error.mark();
        });

        let channel = connection.create_channel().await?;
        let on_error = closed.clone();
        channel.on_error(move |err| {
            tracing::error!(error = %err, "AMQP channel error");
            on_error.mark();
        });

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
            closed,
        }))
    }

    fn endpoint(&self) -> String {
        self.uri.clone()
    }
}

/// Set once the connection or channel is lost. Shared by the error
/// callbacks, consumer streams and failed operations.
#[derive(Clone)]
struct ClosedFlag(Arc<watch::Sender<bool>>);

impl Default for ClosedFlag {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }
}

impl ClosedFlag {
    fn mark(&self) {
        self.0.send_replace(true);
    }

    fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Passes `result` through, marking the flag when an operation failed
    /// and the channel no longer reports itself connected.
    fn observe<T, E>(
        &self,
        result: std::result::Result<T, E>,
        connected: bool,
    ) -> std::result::Result<T, E> {
        if result.is_err() && !connected {
            self.mark();
        }
        result
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
    closed: ClosedFlag,
}

impl AmqpChannel {
    fn connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let result = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await;
        self.closed.observe(result, self.connected())?;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let result = async {
            self.channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default()
                        .with_content_type("application/json".into())
                        .with_delivery_mode(PERSISTENT),
                )
                .await?
                .await
        }
        .await;
        self.closed.observe(result, self.connected())?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let result = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await;
        let consumer = self.closed.observe(result, self.connected())?;

        let closed = self.closed.clone();
        let stream = futures_util::stream::unfold(
            (Box::pin(consumer), closed),
            |(mut consumer, closed)| async move {
                loop {
                    match consumer.next().await {
                        Some(Ok(delivery)) => {
                            let acker = AmqpAcker {
                                acker: delivery.acker,
                            };
                            return Some((Delivery::new(delivery.data, acker), (consumer, closed)));
                        }
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "AMQP consumer error");
                        }
                        None => {
                            closed.mark();
                            return None;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn closed(&self) {
        self.closed.wait().await
    }

    fn is_open(&self) -> bool {
        !self.closed.is_set() && self.connected()
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}
