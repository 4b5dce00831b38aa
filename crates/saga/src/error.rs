//! Saga error types.

use std::time::Duration;

use broker::BrokerError;
use common::OrderId;
use order_store::OrderStoreError;
use thiserror::Error;

use crate::state::OrderStatus;

/// Errors that can occur while driving an order through the saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The broker could not be reached or the connection is being
    /// re-established.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The purchase request could not be published. The pending entry
    /// exists and has been marked failed.
    #[error("Order {order_id} could not be published: {source}")]
    PublishUnavailable {
        order_id: OrderId,
        #[source]
        source: BrokerError,
    },

    /// The order store rejected a write or read.
    #[error("Order store unavailable: {0}")]
    StoreUnavailable(#[from] OrderStoreError),

    /// No completion event arrived before the deadline.
    #[error("Timed out after {waited:?} waiting for order {order_id}")]
    Timeout { order_id: OrderId, waited: Duration },

    /// The order id was never registered or has been evicted.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order exists but has not completed.
    #[error("Order {order_id} is not completed yet (status: {status})")]
    NotReady {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The order was already marked failed.
    #[error("Order {0} failed")]
    OrderFailed(OrderId),

    /// An entry with this order id is already registered.
    #[error("Order already registered: {0}")]
    DuplicateOrder(OrderId),

    /// The purchase request is malformed.
    #[error("Invalid order: {0}")]
    Validation(String),

    /// A message could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
