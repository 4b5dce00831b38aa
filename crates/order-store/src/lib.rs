//! Storage for orders accepted by the fulfillment service.
//!
//! Saving is idempotent by order id, so a purchase request redelivered by
//! the broker never produces a second row or a recomputed total.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod store;

pub use common::OrderId;
pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use order::PersistedOrder;
pub use postgres::PostgresOrderStore;
pub use store::{OrderStore, SaveOutcome};
