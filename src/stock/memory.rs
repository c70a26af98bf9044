//! In-memory stock ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Result, StockError, StockLedger};
use crate::domain::ProductId;

/// In-memory ledger keyed by product id.
///
/// All three operations take the same mutex, so the check-and-write in
/// `try_decrement` is a single critical section.
#[derive(Default)]
pub struct MemoryStockLedger {
    available: Mutex<HashMap<ProductId, u32>>,
}

impl MemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite the available count for a product.
    pub async fn set_available(&self, product_id: &str, quantity: u32) {
        self.available
            .lock()
            .await
            .insert(product_id.to_string(), quantity);
    }
}

#[async_trait]
impl StockLedger for MemoryStockLedger {
    async fn try_decrement(&self, product_id: &str, quantity: u32) -> Result<u32> {
        let mut available = self.available.lock().await;
        let current = available
            .get_mut(product_id)
            .ok_or_else(|| StockError::UnknownProduct(product_id.to_string()))?;

        if *current < quantity {
            return Err(StockError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: quantity,
                available: *current,
            });
        }

        *current -= quantity;
        debug!(product = %product_id, quantity, remaining = *current, "stock decremented");
        Ok(*current)
    }

    async fn increment(&self, product_id: &str, quantity: u32) -> Result<u32> {
        let mut available = self.available.lock().await;
        let current = available
            .get_mut(product_id)
            .ok_or_else(|| StockError::UnknownProduct(product_id.to_string()))?;

        *current += quantity;
        Ok(*current)
    }

    async fn available_of(&self, product_id: &str) -> Result<u32> {
        self.available
            .lock()
            .await
            .get(product_id)
            .copied()
            .ok_or_else(|| StockError::UnknownProduct(product_id.to_string()))
    }
}
