//! Cart façade: every cart mutation goes through here.
//!
//! Each public operation is a bounded retry loop around the store's
//! version-conditioned save: load (or create), apply the intent in memory,
//! recompute the subtotal from scratch, save. A `VersionConflict` reloads
//! the cart and replays the same intent on top of the winner's write, which
//! is safe precisely because intents are semantic ("add 2 of product X"),
//! never absolute field writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::{CatalogError, ProductCatalog};
use crate::config::CoreConfig;
use crate::coupon::{CouponEngine, CouponError};
use crate::domain::{AppliedCoupon, Cart, CartItem, OwnerKey, ProductId};
use crate::stock::{StockError, StockLedger};
use crate::store::{CartStore, StoreError};

#[cfg(test)]
mod tests;

/// Result type for cart operations.
pub type Result<T> = std::result::Result<T, CartError>;

/// Errors surfaced by cart operations.
///
/// Everything except `ConcurrentUpdate`, `Store`, and `CatalogUnavailable`
/// is an expected business rejection.
#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("product is not active: {0}")]
    ProductInactive(ProductId),

    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("cart item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("cart is empty")]
    CartEmpty,

    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error("invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("coupon not applicable: {0}")]
    CouponNotApplicable(String),

    /// Retry budget exhausted; rare enough to warrant a capacity look.
    #[error("concurrent updates exhausted {attempts} save attempts")]
    ConcurrentUpdate { attempts: u32 },

    #[error("no active cart")]
    CartNotFound,

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CartError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CartNotFound(_) => CartError::CartNotFound,
            other => CartError::Store(other),
        }
    }
}

impl From<CatalogError> for CartError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => CartError::ProductNotFound(id),
            CatalogError::Unavailable(reason) => CartError::CatalogUnavailable(reason),
        }
    }
}

impl From<CouponError> for CartError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::InvalidCoupon(code) => CartError::InvalidCoupon(code),
            CouponError::NotApplicable(reason) => CartError::CouponNotApplicable(reason),
            CouponError::EmptyCart => CartError::CartEmpty,
        }
    }
}

/// The semantic intent of one cart mutation; replayed verbatim against a
/// freshly loaded cart after a version conflict.
enum Mutation {
    AddItem {
        product_id: ProductId,
        quantity: u32,
        attributes: BTreeMap<String, String>,
    },
    UpdateQuantity {
        item_id: Uuid,
        quantity: u32,
    },
    RemoveItem {
        item_id: Uuid,
    },
    Clear,
    ApplyCoupon {
        code: String,
    },
    RemoveCoupon,
}

/// Cart mutation façade.
pub struct CartManager {
    store: Arc<dyn CartStore>,
    ledger: Arc<dyn StockLedger>,
    catalog: Arc<dyn ProductCatalog>,
    coupons: Arc<CouponEngine>,
    max_save_attempts: u32,
    guest_ttl: Duration,
}

impl CartManager {
    pub fn new(
        store: Arc<dyn CartStore>,
        ledger: Arc<dyn StockLedger>,
        catalog: Arc<dyn ProductCatalog>,
        coupons: Arc<CouponEngine>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            catalog,
            coupons,
            max_save_attempts: config.limits.max_save_attempts,
            guest_ttl: config.guest.ttl(),
        }
    }

    /// Add `quantity` of a product to the owner's cart, merging into an
    /// existing line when `(product_id, attributes)` matches.
    ///
    /// The stock check here is advisory (UX): the authoritative gate is
    /// the checkout-time decrement.
    pub async fn add_item(
        &self,
        owner: &OwnerKey,
        product_id: &str,
        quantity: u32,
        attributes: BTreeMap<String, String>,
    ) -> Result<Cart> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        self.mutate(
            owner,
            Mutation::AddItem {
                product_id: product_id.to_string(),
                quantity,
                attributes,
            },
        )
        .await
    }

    /// Set a line's quantity. Zero removes the line.
    pub async fn update_item_quantity(
        &self,
        owner: &OwnerKey,
        item_id: Uuid,
        quantity: u32,
    ) -> Result<Cart> {
        self.mutate(owner, Mutation::UpdateQuantity { item_id, quantity })
            .await
    }

    /// Remove a line.
    pub async fn remove_item(&self, owner: &OwnerKey, item_id: Uuid) -> Result<Cart> {
        self.mutate(owner, Mutation::RemoveItem { item_id }).await
    }

    /// Empty the cart and drop any coupon.
    pub async fn clear(&self, owner: &OwnerKey) -> Result<Cart> {
        self.mutate(owner, Mutation::Clear).await
    }

    /// Apply a coupon code, computing the discount against the current
    /// cart contents.
    pub async fn apply_coupon(&self, owner: &OwnerKey, code: &str) -> Result<Cart> {
        self.mutate(
            owner,
            Mutation::ApplyCoupon {
                code: code.to_string(),
            },
        )
        .await
    }

    /// Drop the applied coupon, if any.
    pub async fn remove_coupon(&self, owner: &OwnerKey) -> Result<Cart> {
        self.mutate(owner, Mutation::RemoveCoupon).await
    }

    /// Read the owner's active cart (created if absent), re-validating
    /// price snapshots against the current catalog.
    ///
    /// A snapshot refresh is persisted best-effort: a conflicting writer
    /// wins and the next read refreshes again.
    pub async fn get_cart(&self, owner: &OwnerKey) -> Result<Cart> {
        let mut cart = self.load_or_create(owner).await?;

        let mut repriced = false;
        for item in &mut cart.items {
            if let Ok(product) = self.catalog.get_product(&item.product_id).await {
                let current = product.effective_price();
                if current != item.price_snapshot {
                    item.price_snapshot = current;
                    item.updated_at = Utc::now();
                    repriced = true;
                }
            }
        }

        if repriced {
            cart.recompute_subtotal();
            // A price change invalidates any discount computed against the
            // old subtotal.
            cart.coupon = None;
            match self.store.save(&cart).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(owner = %owner, "price refresh lost a save race; serving display copy");
                    return Ok(cart);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(cart)
    }

    async fn load_or_create(&self, owner: &OwnerKey) -> Result<Cart> {
        if let Some(cart) = self.store.load_active(owner).await? {
            return Ok(cart);
        }
        match self.store.create_active(owner).await {
            Ok(cart) => Ok(cart),
            // A concurrent request created the cart first; use theirs.
            Err(StoreError::ActiveCartExists(_)) => Ok(self
                .store
                .load_active(owner)
                .await?
                .ok_or(CartError::CartNotFound)?),
            Err(err) => Err(err.into()),
        }
    }

    async fn mutate(&self, owner: &OwnerKey, mutation: Mutation) -> Result<Cart> {
        let mut attempts = 0;
        while attempts < self.max_save_attempts {
            attempts += 1;

            let mut cart = self.load_or_create(owner).await?;
            self.apply(&mut cart, &mutation).await?;
            cart.recompute_subtotal();
            cart.touch(Utc::now(), self.guest_ttl);

            match self.store.save(&cart).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(owner = %owner, attempt = attempts, "version conflict, replaying intent");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(owner = %owner, attempts, "optimistic retry budget exhausted");
        Err(CartError::ConcurrentUpdate { attempts })
    }

    async fn apply(&self, cart: &mut Cart, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::AddItem {
                product_id,
                quantity,
                attributes,
            } => {
                let product = self.catalog.get_product(product_id).await?;
                if !product.is_active {
                    return Err(CartError::ProductInactive(product_id.clone()));
                }

                let existing = cart
                    .line_matching(product_id, attributes)
                    .map(|i| i.quantity)
                    .unwrap_or(0);
                self.advisory_stock_check(product_id, existing + quantity)
                    .await?;

                let now = Utc::now();
                let price = product.effective_price();
                if let Some(line) = cart.line_matching_mut(product_id, attributes) {
                    line.quantity += quantity;
                    line.price_snapshot = price;
                    line.updated_at = now;
                } else {
                    cart.items.push(CartItem::new(
                        product_id.clone(),
                        *quantity,
                        price,
                        attributes.clone(),
                        now,
                    ));
                }
                cart.coupon = None;
            }

            Mutation::UpdateQuantity { item_id, quantity } => {
                if *quantity == 0 {
                    return self.remove_line(cart, *item_id);
                }

                let product_id = cart
                    .line_by_id(*item_id)
                    .map(|i| i.product_id.clone())
                    .ok_or(CartError::ItemNotFound(*item_id))?;
                self.advisory_stock_check(&product_id, *quantity).await?;

                let line = cart
                    .line_by_id_mut(*item_id)
                    .ok_or(CartError::ItemNotFound(*item_id))?;
                line.quantity = *quantity;
                line.updated_at = Utc::now();
                cart.coupon = None;
            }

            Mutation::RemoveItem { item_id } => {
                self.remove_line(cart, *item_id)?;
            }

            Mutation::Clear => {
                cart.items.clear();
                cart.coupon = None;
            }

            Mutation::ApplyCoupon { code } => {
                let quote = self.coupons.evaluate(cart, code, Utc::now())?;
                cart.coupon = Some(AppliedCoupon {
                    code: quote.code,
                    discount: quote.discount,
                    applied_at: Utc::now(),
                });
            }

            Mutation::RemoveCoupon => {
                cart.coupon = None;
            }
        }
        Ok(())
    }

    fn remove_line(&self, cart: &mut Cart, item_id: Uuid) -> Result<()> {
        let before = cart.items.len();
        cart.items.retain(|i| i.id != item_id);
        if cart.items.len() == before {
            return Err(CartError::ItemNotFound(item_id));
        }
        cart.coupon = None;
        Ok(())
    }

    async fn advisory_stock_check(&self, product_id: &str, wanted: u32) -> Result<()> {
        let available = self
            .ledger
            .available_of(product_id)
            .await
            .map_err(|err| match err {
                StockError::UnknownProduct(id) => CartError::ProductNotFound(id),
                StockError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                } => CartError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                },
            })?;
        if available < wanted {
            return Err(CartError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: wanted,
                available,
            });
        }
        Ok(())
    }
}
