//! Stock ledger: authoritative available-quantity accounting.
//!
//! `try_decrement` is the only gate that may authorize taking stock. The
//! sufficiency check and the write are one indivisible operation against
//! the store; callers must never pair a read with a separate write.

use async_trait::async_trait;

use crate::domain::ProductId;

mod memory;

pub use memory::MemoryStockLedger;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, StockError>;

/// Errors from stock ledger operations.
///
/// `InsufficientStock` is an expected business outcome (the shopper reduces
/// quantity), not an infrastructure fault.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StockError {
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),
}

/// Interface for atomic stock accounting.
///
/// Implementations:
/// - `MemoryStockLedger`: in-memory ledger; the critical section under its
///   lock is the indivisible conditional update. A database implementation
///   would express the same contract as a conditional write
///   (`available >= quantity`).
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Atomically decrement `available` by `quantity` if sufficient.
    ///
    /// Returns the new available count, or `InsufficientStock` without any
    /// change to the record.
    async fn try_decrement(&self, product_id: &str, quantity: u32) -> Result<u32>;

    /// Increment `available` by `quantity`. Used for cancellation and for
    /// compensating a failed checkout. No precondition beyond product
    /// existence.
    async fn increment(&self, product_id: &str, quantity: u32) -> Result<u32>;

    /// Point-in-time read of `available`. Advisory only; never use it to
    /// gate a decrement decision across two calls.
    async fn available_of(&self, product_id: &str) -> Result<u32>;
}
