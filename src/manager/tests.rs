use std::collections::BTreeMap;
use std::sync::Arc;

use super::*;
use crate::catalog::{MemoryCatalog, ProductRecord};
use crate::coupon::PercentOffRule;
use crate::domain::Money;
use crate::stock::MemoryStockLedger;
use crate::store::MemoryCartStore;

struct Fixture {
    manager: Arc<CartManager>,
    store: Arc<MemoryCartStore>,
    ledger: Arc<MemoryStockLedger>,
    catalog: Arc<MemoryCatalog>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryCartStore::default());
    let ledger = Arc::new(MemoryStockLedger::new());
    let catalog = Arc::new(MemoryCatalog::new());

    let mut engine = CouponEngine::new();
    engine.register(Arc::new(PercentOffRule::new("SAVE10", 10)));

    let manager = Arc::new(CartManager::new(
        store.clone(),
        ledger.clone(),
        catalog.clone(),
        Arc::new(engine),
        &CoreConfig::default(),
    ));

    Fixture {
        manager,
        store,
        ledger,
        catalog,
    }
}

async fn seed_product(f: &Fixture, id: &str, price: Money, sale: Option<Money>, stock: u32) {
    f.catalog
        .upsert(ProductRecord {
            id: id.to_string(),
            name: format!("Product {id}"),
            price,
            sale_price: sale,
            stock,
            is_active: true,
        })
        .await;
    f.ledger.set_available(id, stock).await;
}

fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn owner() -> OwnerKey {
    OwnerKey::User("u1".into())
}

#[tokio::test]
async fn test_add_item_creates_cart_and_merges_lines() {
    let f = fixture();
    seed_product(&f, "p1", 1_500_000, None, 10).await;

    let cart = f
        .manager
        .add_item(&owner(), "p1", 1, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.subtotal, 1_500_000);

    // Same (product, attributes) merges into the existing line.
    let cart = f
        .manager
        .add_item(&owner(), "p1", 2, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 3);
    assert_eq!(cart.subtotal, 4_500_000);

    // Different attributes get their own line.
    let cart = f
        .manager
        .add_item(&owner(), "p1", 1, attrs(&[("size", "l")]))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 2);
}

#[tokio::test]
async fn test_price_snapshot_prefers_sale_price() {
    let f = fixture();
    seed_product(&f, "p1", 1_000_000, Some(750_000), 5).await;

    let cart = f
        .manager
        .add_item(&owner(), "p1", 1, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(cart.items[0].price_snapshot, 750_000);
    assert_eq!(cart.subtotal, 750_000);
}

#[tokio::test]
async fn test_add_item_advisory_stock_check() {
    let f = fixture();
    seed_product(&f, "p1", 1000, None, 3).await;

    f.manager
        .add_item(&owner(), "p1", 2, BTreeMap::new())
        .await
        .unwrap();

    // Existing 2 + requested 2 > available 3.
    let err = f
        .manager
        .add_item(&owner(), "p1", 2, BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CartError::InsufficientStock {
            requested: 4,
            available: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn test_add_item_rejects_inactive_and_unknown_products() {
    let f = fixture();
    seed_product(&f, "p1", 1000, None, 5).await;
    f.catalog.set_active("p1", false).await;

    assert!(matches!(
        f.manager.add_item(&owner(), "p1", 1, BTreeMap::new()).await,
        Err(CartError::ProductInactive(_))
    ));
    assert!(matches!(
        f.manager
            .add_item(&owner(), "ghost", 1, BTreeMap::new())
            .await,
        Err(CartError::ProductNotFound(_))
    ));
    assert!(matches!(
        f.manager.add_item(&owner(), "p1", 0, BTreeMap::new()).await,
        Err(CartError::InvalidQuantity)
    ));
}

#[tokio::test]
async fn test_update_quantity_and_zero_removes() {
    let f = fixture();
    seed_product(&f, "p1", 1000, None, 10).await;

    let cart = f
        .manager
        .add_item(&owner(), "p1", 2, BTreeMap::new())
        .await
        .unwrap();
    let item_id = cart.items[0].id;

    let cart = f
        .manager
        .update_item_quantity(&owner(), item_id, 5)
        .await
        .unwrap();
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(cart.subtotal, 5000);

    // Quantity above stock is rejected as advisory.
    assert!(matches!(
        f.manager.update_item_quantity(&owner(), item_id, 11).await,
        Err(CartError::InsufficientStock { .. })
    ));

    let cart = f
        .manager
        .update_item_quantity(&owner(), item_id, 0)
        .await
        .unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.subtotal, 0);

    assert!(matches!(
        f.manager.update_item_quantity(&owner(), item_id, 1).await,
        Err(CartError::ItemNotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_item_and_clear() {
    let f = fixture();
    seed_product(&f, "p1", 1000, None, 10).await;
    seed_product(&f, "p2", 2000, None, 10).await;

    let cart = f
        .manager
        .add_item(&owner(), "p1", 1, BTreeMap::new())
        .await
        .unwrap();
    let item_id = cart.items[0].id;
    f.manager
        .add_item(&owner(), "p2", 1, BTreeMap::new())
        .await
        .unwrap();

    let cart = f.manager.remove_item(&owner(), item_id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.subtotal, 2000);

    assert!(matches!(
        f.manager.remove_item(&owner(), item_id).await,
        Err(CartError::ItemNotFound(_))
    ));

    let cart = f.manager.clear(&owner()).await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.subtotal, 0);
    assert!(cart.coupon.is_none());
}

#[tokio::test]
async fn test_coupon_apply_and_reject_on_empty_cart() {
    let f = fixture();
    seed_product(&f, "p1", 1_000_000, None, 10).await;

    assert!(matches!(
        f.manager.apply_coupon(&owner(), "SAVE10").await,
        Err(CartError::CartEmpty)
    ));

    f.manager
        .add_item(&owner(), "p1", 1, BTreeMap::new())
        .await
        .unwrap();

    let cart = f.manager.apply_coupon(&owner(), "SAVE10").await.unwrap();
    let coupon = cart.coupon.unwrap();
    assert_eq!(coupon.code, "SAVE10");
    assert_eq!(coupon.discount, 100_000);

    assert!(matches!(
        f.manager.apply_coupon(&owner(), "BOGUS").await,
        Err(CartError::InvalidCoupon(_))
    ));

    let cart = f.manager.remove_coupon(&owner()).await.unwrap();
    assert!(cart.coupon.is_none());
}

#[tokio::test]
async fn test_stale_discount_never_survives_content_mutation() {
    let f = fixture();
    seed_product(&f, "p1", 400_000, None, 10).await;
    seed_product(&f, "p2", 600_000, None, 10).await;

    f.manager
        .add_item(&owner(), "p1", 1, BTreeMap::new())
        .await
        .unwrap();
    let cart = f
        .manager
        .add_item(&owner(), "p2", 1, BTreeMap::new())
        .await
        .unwrap();
    let p2_line = cart.items[1].id;

    let cart = f.manager.apply_coupon(&owner(), "SAVE10").await.unwrap();
    assert_eq!(cart.coupon.as_ref().unwrap().discount, 100_000);

    // Removing an item drops the now-stale discount entirely.
    let cart = f.manager.remove_item(&owner(), p2_line).await.unwrap();
    assert!(cart.coupon.is_none());
    assert_eq!(cart.subtotal, 400_000);

    // Re-applying computes against the new subtotal.
    let cart = f.manager.apply_coupon(&owner(), "SAVE10").await.unwrap();
    assert_eq!(cart.coupon.unwrap().discount, 40_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_both_land() {
    let f = fixture();
    seed_product(&f, "p1", 1000, None, 100).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let manager = Arc::clone(&f.manager);
        handles.push(tokio::spawn(async move {
            manager
                .add_item(&OwnerKey::User("u1".into()), "p1", 1, BTreeMap::new())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let cart = f
        .store
        .load_active(&OwnerKey::User("u1".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
    assert_eq!(cart.subtotal, 2000);
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces_concurrent_update() {
    let f = fixture();
    seed_product(&f, "p1", 1000, None, 10).await;
    f.manager
        .add_item(&owner(), "p1", 1, BTreeMap::new())
        .await
        .unwrap();

    // Every save now loses the version race.
    f.store.set_conflict_on_save(true).await;
    let err = f
        .manager
        .add_item(&owner(), "p1", 1, BTreeMap::new())
        .await
        .unwrap_err();
    let budget = CoreConfig::default().limits.max_save_attempts;
    assert!(matches!(err, CartError::ConcurrentUpdate { attempts } if attempts == budget));

    // Nothing landed; the cart still holds the first add only.
    f.store.set_conflict_on_save(false).await;
    let cart = f.store.load_active(&owner()).await.unwrap().unwrap();
    assert_eq!(cart.items[0].quantity, 1);
}

#[tokio::test]
async fn test_subtotal_invariant_over_mutation_sequence() {
    let f = fixture();
    seed_product(&f, "p1", 123, None, 100).await;
    seed_product(&f, "p2", 456, None, 100).await;

    f.manager
        .add_item(&owner(), "p1", 3, BTreeMap::new())
        .await
        .unwrap();
    f.manager
        .add_item(&owner(), "p2", 2, BTreeMap::new())
        .await
        .unwrap();
    let cart = f
        .manager
        .add_item(&owner(), "p1", 1, attrs(&[("color", "red")]))
        .await
        .unwrap();
    let red_line = cart.items[2].id;

    let cart = f
        .manager
        .update_item_quantity(&owner(), red_line, 4)
        .await
        .unwrap();
    let expected: Money = cart.items.iter().map(|i| i.line_total()).sum();
    assert_eq!(cart.subtotal, expected);

    let cart = f.manager.remove_item(&owner(), red_line).await.unwrap();
    let expected: Money = cart.items.iter().map(|i| i.line_total()).sum();
    assert_eq!(cart.subtotal, expected);
}

#[tokio::test]
async fn test_get_cart_refreshes_stale_price_snapshots() {
    let f = fixture();
    seed_product(&f, "p1", 1000, None, 10).await;

    f.manager
        .add_item(&owner(), "p1", 2, BTreeMap::new())
        .await
        .unwrap();

    // Catalog price drops after the add.
    seed_product(&f, "p1", 800, None, 10).await;

    let cart = f.manager.get_cart(&owner()).await.unwrap();
    assert_eq!(cart.items[0].price_snapshot, 800);
    assert_eq!(cart.subtotal, 1600);

    // The refresh was persisted.
    let stored = f.store.load_active(&owner()).await.unwrap().unwrap();
    assert_eq!(stored.subtotal, 1600);
}
