//! Identifiers and wire messages exchanged between the storefront and
//! fulfillment services.

pub mod messages;
pub mod types;

pub use messages::{OrderCompletion, OrderRequest, ProductRef, SCHEMA_VERSION, total_price};
pub use types::OrderId;
