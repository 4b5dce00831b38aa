//! Message broker plumbing for the order-fulfillment services.
//!
//! The [`ConnectionManager`] owns the single connection and channel a
//! service uses. It re-declares the queue topology after every successful
//! (re)connect and retries failed connections with two distinct backoff
//! strategies: a growing schedule while the first connection is being
//! established and a fixed delay after an established connection drops.
//!
//! Transports are pluggable through the [`Transport`] and [`Channel`]
//! traits. [`AmqpTransport`] talks to RabbitMQ; [`InMemoryBroker`] is a
//! process-local broker with the same at-least-once semantics, used by the
//! test suites and for running both services in one process.

pub mod amqp;
pub mod backoff;
pub mod config;
pub mod consumer;
pub mod error;
pub mod manager;
pub mod memory;
pub mod transport;

pub use amqp::AmqpTransport;
pub use backoff::{BackoffPolicy, ReconnectPolicy};
pub use config::BrokerConfig;
pub use consumer::{MessageHandler, run_consumer};
pub use error::{BrokerError, Result};
pub use manager::{ChannelHandle, ConnectionManager};
pub use memory::InMemoryBroker;
pub use transport::{Acknowledger, Channel, Delivery, DeliveryStream, Transport};
