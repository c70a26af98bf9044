//! Product catalog boundary.
//!
//! This core does not own product metadata; it consumes a read-only view of
//! price, sale price, stock, and active flag. Any upstream cache must be
//! transparent to callers of this trait: stock read here is advisory only,
//! the authoritative decrement lives in [`crate::stock::StockLedger`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Money, ProductId};

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors from the product catalog boundary.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("product not found: {0}")]
    NotFound(ProductId),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Read-only product view consumed by this core.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub sale_price: Option<Money>,
    pub stock: u32,
    pub is_active: bool,
}

impl ProductRecord {
    /// The price a shopper pays right now.
    pub fn effective_price(&self) -> Money {
        self.sale_price.unwrap_or(self.price)
    }
}

/// Interface to the product catalog.
///
/// Implementations:
/// - `MemoryCatalog`: in-memory map for tests and local development
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetch a product by id.
    async fn get_product(&self, product_id: &str) -> Result<ProductRecord>;
}

/// In-memory catalog backed by a map.
#[derive(Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<ProductId, ProductRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product.
    pub async fn upsert(&self, product: ProductRecord) {
        self.products
            .write()
            .await
            .insert(product.id.clone(), product);
    }

    /// Flip a product's active flag.
    pub async fn set_active(&self, product_id: &str, active: bool) {
        if let Some(p) = self.products.write().await.get_mut(product_id) {
            p.is_active = active;
        }
    }
}

#[async_trait]
impl ProductCatalog for MemoryCatalog {
    async fn get_product(&self, product_id: &str) -> Result<ProductRecord> {
        self.products
            .read()
            .await
            .get(product_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(product_id.to_string()))
    }
}
