//! Messages carried on the `orders` and `products` queues.
//!
//! Field names are camelCase on the wire. Every message carries a
//! `schemaVersion`; payloads without one are read as version 1.

use serde::{Deserialize, Serialize};

use crate::OrderId;

/// Current wire schema version.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// A product as referenced by an order.
///
/// Only `price` takes part in order arithmetic; the remaining fields are
/// carried through for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProductRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Sums the prices of `products`.
pub fn total_price(products: &[ProductRef]) -> f64 {
    products.iter().map(|p| p.price).sum()
}

/// Purchase request published on the `orders` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub order_id: OrderId,
    pub username: String,
    pub products: Vec<ProductRef>,
}

impl OrderRequest {
    pub fn new(order_id: OrderId, username: impl Into<String>, products: Vec<ProductRef>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            order_id,
            username: username.into(),
            products,
        }
    }
}

/// Completion event published on the `products` queue once the order has
/// been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCompletion {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub order_id: OrderId,
    pub user: String,
    pub products: Vec<ProductRef>,
    pub total_price: f64,
}

impl OrderCompletion {
    pub fn new(
        order_id: OrderId,
        user: impl Into<String>,
        products: Vec<ProductRef>,
        total_price: f64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            order_id,
            user: user.into(),
            products,
            total_price,
        }
    }
}
