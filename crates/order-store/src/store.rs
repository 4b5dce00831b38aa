use async_trait::async_trait;

use crate::{OrderId, PersistedOrder, Result};

/// Outcome of [`OrderStore::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The order was new and has been written.
    Inserted(PersistedOrder),
    /// An order with the same id already existed; it is returned unchanged.
    Existing(PersistedOrder),
}

impl SaveOutcome {
    /// The order as stored.
    pub fn order(&self) -> &PersistedOrder {
        match self {
            SaveOutcome::Inserted(order) | SaveOutcome::Existing(order) => order,
        }
    }

    pub fn into_order(self) -> PersistedOrder {
        match self {
            SaveOutcome::Inserted(order) | SaveOutcome::Existing(order) => order,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, SaveOutcome::Existing(_))
    }
}

/// Core trait for order store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists `order` unless an order with the same id is already stored.
    async fn save(&self, order: PersistedOrder) -> Result<SaveOutcome>;

    /// Loads an order by id.
    async fn get(&self, order_id: OrderId) -> Result<Option<PersistedOrder>>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for std::sync::Arc<T> {
    async fn save(&self, order: PersistedOrder) -> Result<SaveOutcome> {
        (**self).save(order).await
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<PersistedOrder>> {
        (**self).get(order_id).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}
