//! Persistence seams: cart documents, order documents, order numbers.
//!
//! `CartStore::save` is version-conditioned and never retries internally;
//! replaying intent on a `VersionConflict` belongs to the caller, which
//! knows what the mutation meant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Cart, Order, OwnerKey};

mod memory;

pub use memory::{MemoryCartStore, MemoryOrderStore, SequentialOrderNumbers};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from cart/order persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer saved the cart between this caller's read and write.
    #[error("version conflict on cart {cart_id}: expected version {expected}")]
    VersionConflict { cart_id: Uuid, expected: u64 },

    #[error("cart not found: {0}")]
    CartNotFound(Uuid),

    /// The (owner, active) uniqueness constraint would be violated.
    #[error("owner {0} already has an active cart")]
    ActiveCartExists(OwnerKey),

    #[error("duplicate order number: {0}")]
    DuplicateOrderNumber(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Interface for cart persistence with optimistic concurrency.
///
/// Implementations:
/// - `MemoryCartStore`: in-memory store for tests and local development
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Load the single active cart for an owner, if any.
    async fn load_active(&self, owner: &OwnerKey) -> Result<Option<Cart>>;

    /// Create a fresh active cart for an owner.
    ///
    /// Fails with `ActiveCartExists` if the owner already has one; the
    /// uniqueness constraint on (owner, active) is enforced here.
    async fn create_active(&self, owner: &OwnerKey) -> Result<Cart>;

    /// Load a cart by id regardless of status. Ownership checks are the
    /// caller's responsibility.
    async fn get(&self, cart_id: Uuid) -> Result<Cart>;

    /// Persist a cart if `cart.version` still matches the stored version.
    ///
    /// On success the stored version is incremented and the updated cart
    /// returned. On mismatch, `VersionConflict`; no internal retry.
    async fn save(&self, cart: &Cart) -> Result<Cart>;

    /// Active guest carts whose `expires_at` has passed. Feeds the
    /// abandonment sweep.
    async fn expired_guest_carts(&self, now: DateTime<Utc>) -> Result<Vec<Cart>>;
}

/// Interface for order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order. All-or-nothing: a returned error means nothing
    /// was written.
    async fn insert(&self, order: Order) -> Result<Order>;

    /// Load an order by its human-readable number.
    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>>;
}

/// Order number collaborator. Numbers must be unique and monotonically
/// assignable; gaps are acceptable, duplicates are not.
pub trait OrderNumberGenerator: Send + Sync {
    fn next_number(&self) -> String;
}
