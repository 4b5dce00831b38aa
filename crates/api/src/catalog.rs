//! Product catalog consulted by `POST /buy`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use common::ProductRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Resolves product ids to products with their current price.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the products matching `ids`, in request order, each at most
    /// once. Unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<ProductRef>, CatalogError>;

    /// Returns true if the catalog backend is reachable.
    async fn ping(&self) -> bool;
}

/// Catalog held in memory, optionally seeded from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductCatalog {
    products: HashMap<String, ProductRef>,
}

impl InMemoryProductCatalog {
    pub fn new(products: impl IntoIterator<Item = ProductRef>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Loads a JSON array of products.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read(path)?;
        let products: Vec<ProductRef> = serde_json::from_slice(&raw)?;
        Ok(Self::new(products))
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<ProductRef>, CatalogError> {
        let mut seen = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.products.get(id).cloned())
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}
