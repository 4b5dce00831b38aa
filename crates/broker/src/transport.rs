//! Transport abstraction over a message broker.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde::de::DeserializeOwned;

use crate::Result;

/// A stream of deliveries from one queue. Ends when the underlying
/// connection is lost.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positively acknowledges the delivery; the broker forgets it.
    async fn ack(&self) -> Result<()>;

    /// Negatively acknowledges the delivery, optionally returning it to the
    /// queue for redelivery.
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message received from a queue, awaiting settlement.
pub struct Delivery {
    data: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(data: Vec<u8>, acker: impl Acknowledger + 'static) -> Self {
        Self {
            data,
            acker: Box::new(acker),
        }
    }

    /// Raw message body.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the body as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    /// Returns the message to the queue for another attempt.
    pub async fn requeue(&self) -> Result<()> {
        self.acker.nack(true).await
    }

    /// Discards a message that can never be processed.
    pub async fn reject(&self) -> Result<()> {
        self.acker.nack(false).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// A channel on an open broker connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declares a queue. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Publishes a message to `queue` through the default exchange.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Starts consuming from `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;

    /// Resolves once the underlying connection has been lost.
    async fn closed(&self);

    /// Returns true while the connection and channel are usable.
    fn is_open(&self) -> bool;
}

/// Opens connections to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Makes a single attempt to open a connection and a channel on it.
    async fn connect(&self) -> Result<Arc<dyn Channel>>;

    /// Human-readable endpoint, used in log output.
    fn endpoint(&self) -> String;
}
