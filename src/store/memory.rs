//! In-memory cart and order stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CartStore, OrderNumberGenerator, OrderStore, Result, StoreError};
use crate::domain::{Cart, CartStatus, Order, OwnerKey};

#[derive(Default)]
struct CartTables {
    carts: HashMap<Uuid, Cart>,
    /// The (owner, active) uniqueness index.
    active: HashMap<OwnerKey, Uuid>,
}

/// In-memory cart store with version-conditioned saves.
///
/// Carries a conflict toggle so tests can exercise the retry-exhaustion
/// path in callers that replay intent on `VersionConflict`.
pub struct MemoryCartStore {
    tables: RwLock<CartTables>,
    guest_ttl: Duration,
    conflict_on_save: RwLock<bool>,
}

impl MemoryCartStore {
    pub fn new(guest_ttl: Duration) -> Self {
        Self {
            tables: RwLock::new(CartTables::default()),
            guest_ttl,
            conflict_on_save: RwLock::new(false),
        }
    }

    /// Make every subsequent `save` report a version conflict.
    pub async fn set_conflict_on_save(&self, conflict: bool) {
        *self.conflict_on_save.write().await = conflict;
    }
}

impl Default for MemoryCartStore {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn load_active(&self, owner: &OwnerKey) -> Result<Option<Cart>> {
        let tables = self.tables.read().await;
        Ok(tables
            .active
            .get(owner)
            .and_then(|id| tables.carts.get(id))
            .filter(|c| c.status == CartStatus::Active)
            .cloned())
    }

    async fn create_active(&self, owner: &OwnerKey) -> Result<Cart> {
        let mut tables = self.tables.write().await;
        if tables.active.contains_key(owner) {
            return Err(StoreError::ActiveCartExists(owner.clone()));
        }

        let cart = Cart::new(owner.clone(), Utc::now(), self.guest_ttl);
        tables.active.insert(owner.clone(), cart.id);
        tables.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn get(&self, cart_id: Uuid) -> Result<Cart> {
        self.tables
            .read()
            .await
            .carts
            .get(&cart_id)
            .cloned()
            .ok_or(StoreError::CartNotFound(cart_id))
    }

    async fn save(&self, cart: &Cart) -> Result<Cart> {
        if *self.conflict_on_save.read().await {
            return Err(StoreError::VersionConflict {
                cart_id: cart.id,
                expected: cart.version,
            });
        }

        let mut tables = self.tables.write().await;
        let stored = tables
            .carts
            .get(&cart.id)
            .ok_or(StoreError::CartNotFound(cart.id))?;

        if stored.version != cart.version {
            return Err(StoreError::VersionConflict {
                cart_id: cart.id,
                expected: cart.version,
            });
        }

        let mut updated = cart.clone();
        updated.version += 1;

        // Leaving Active frees the uniqueness slot for this owner.
        if updated.status != CartStatus::Active
            && tables.active.get(&updated.owner) == Some(&updated.id)
        {
            tables.active.remove(&updated.owner);
        }

        tables.carts.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn expired_guest_carts(&self, now: DateTime<Utc>) -> Result<Vec<Cart>> {
        let tables = self.tables.read().await;
        Ok(tables
            .carts
            .values()
            .filter(|c| {
                c.status == CartStatus::Active
                    && c.owner.is_session()
                    && c.expires_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }
}

/// In-memory order store.
///
/// Carries a failure toggle so tests can exercise the compensation path in
/// the placement coordinator.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
    fail_on_insert: RwLock<bool>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    pub async fn count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<Order> {
        if *self.fail_on_insert.read().await {
            return Err(StoreError::Unavailable("order store offline".to_string()));
        }

        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_number) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number));
        }
        orders.insert(order.order_number.clone(), order.clone());
        Ok(order)
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(order_number).cloned())
    }
}

/// Sequential order numbers: `{prefix}-{yyyymmdd}-{counter}`.
///
/// Monotonic within a process; uniqueness across processes is the backing
/// store's `DuplicateOrderNumber` check.
pub struct SequentialOrderNumbers {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialOrderNumbers {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialOrderNumbers {
    fn default() -> Self {
        Self::new("ORD")
    }
}

impl OrderNumberGenerator for SequentialOrderNumbers {
    fn next_number(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{:06}",
            self.prefix,
            Utc::now().format("%Y%m%d"),
            seq
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_active_cart_per_owner() {
        let store = MemoryCartStore::default();
        let owner = OwnerKey::User("u1".into());

        let cart = store.create_active(&owner).await.unwrap();
        assert!(matches!(
            store.create_active(&owner).await,
            Err(StoreError::ActiveCartExists(_))
        ));

        // Closing the cart frees the slot.
        let mut closed = cart.clone();
        closed.status = CartStatus::Merged;
        store.save(&closed).await.unwrap();
        store.create_active(&owner).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_requires_matching_version() {
        let store = MemoryCartStore::default();
        let owner = OwnerKey::User("u1".into());
        let cart = store.create_active(&owner).await.unwrap();

        let first = store.save(&cart).await.unwrap();
        assert_eq!(first.version, cart.version + 1);

        // The stale copy now conflicts.
        let stale = store.save(&cart).await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));

        // The fresh copy saves cleanly.
        store.save(&first).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_active_ignores_terminal_carts() {
        let store = MemoryCartStore::default();
        let owner = OwnerKey::Session("s1".into());
        let cart = store.create_active(&owner).await.unwrap();

        let mut merged = cart;
        merged.status = CartStatus::Merged;
        store.save(&merged).await.unwrap();

        assert!(store.load_active(&owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_guest_carts() {
        let store = MemoryCartStore::new(Duration::days(7));
        let guest = OwnerKey::Session("s1".into());
        let user = OwnerKey::User("u1".into());

        let mut cart = store.create_active(&guest).await.unwrap();
        store.create_active(&user).await.unwrap();

        let future = Utc::now() + Duration::days(8);
        let expired = store.expired_guest_carts(future).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].owner, guest);

        // Not yet expired.
        cart.expires_at = Some(future + Duration::days(1));
        store.save(&cart).await.unwrap();
        assert!(store.expired_guest_carts(future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_store_rejects_duplicate_numbers() {
        let store = MemoryOrderStore::new();
        let gen = SequentialOrderNumbers::default();
        let number = gen.next_number();

        let order = Order {
            id: Uuid::new_v4(),
            order_number: number.clone(),
            user_id: "u1".into(),
            items: Vec::new(),
            subtotal: 0,
            shipping_cost: 0,
            discount: 0,
            total_amount: 0,
            status: crate::domain::OrderStatus::Pending,
            created_at: Utc::now(),
            source_cart: None,
        };

        store.insert(order.clone()).await.unwrap();
        assert!(matches!(
            store.insert(order).await,
            Err(StoreError::DuplicateOrderNumber(_))
        ));
        assert!(store.get_by_number(&number).await.unwrap().is_some());
    }

    #[test]
    fn test_order_numbers_are_unique_and_increasing() {
        let gen = SequentialOrderNumbers::new("TEST");
        let a = gen.next_number();
        let b = gen.next_number();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
