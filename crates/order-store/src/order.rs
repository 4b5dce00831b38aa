use chrono::{DateTime, Utc};
use common::{OrderCompletion, OrderId, OrderRequest, ProductRef, total_price};
use serde::{Deserialize, Serialize};

/// An order as recorded by the fulfillment service.
///
/// `total_price` is fixed when the order is first built from its request
/// and is never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedOrder {
    pub order_id: OrderId,
    pub user: String,
    pub products: Vec<ProductRef>,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
}

impl PersistedOrder {
    /// Builds the order for a purchase request, summing product prices.
    pub fn from_request(request: &OrderRequest) -> Self {
        Self {
            order_id: request.order_id,
            user: request.username.clone(),
            products: request.products.clone(),
            total_price: total_price(&request.products),
            created_at: Utc::now(),
        }
    }

    /// The completion event announcing this order.
    pub fn completion(&self) -> OrderCompletion {
        OrderCompletion::new(
            self.order_id,
            self.user.clone(),
            self.products.clone(),
            self.total_price,
        )
    }
}
