//! Asynchronous order-fulfillment saga.
//!
//! The storefront accepts a purchase, publishes it to the `orders` queue
//! and suspends the caller until the fulfillment service announces the
//! persisted order on the `products` queue:
//!
//! 1. [`OrderPublisher`] registers a pending entry under a fresh order id
//!    and publishes the request.
//! 2. [`FulfillmentConsumer`] persists the order, acknowledges the request
//!    and publishes the completion event.
//! 3. [`CompletionConsumer`] resolves the pending entry, waking the caller
//!    blocked in [`PendingOrderRegistry::await_completion`].
//!
//! The order id is the only correlation key across the asynchronous
//! boundary. Waits are bounded; an order whose wait expires is marked
//! failed and any later completion for it is dropped.

pub mod completion;
pub mod error;
pub mod fulfillment;
pub mod publisher;
pub mod registry;
pub mod state;

pub use completion::CompletionConsumer;
pub use error::{Result, SagaError};
pub use fulfillment::FulfillmentConsumer;
pub use publisher::OrderPublisher;
pub use registry::{CompletionOutcome, Invoice, InvoiceLine, PendingOrder, PendingOrderRegistry};
pub use state::OrderStatus;
