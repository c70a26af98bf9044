//! Guest-cart reconciliation at login.
//!
//! Invoked synchronously by the auth flow once a login succeeds, with the
//! anonymous session id carried over from the pre-login browsing session.
//! Idempotent: the guest cart's terminal `Merged` status makes a duplicate
//! invocation a no-op.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::coupon::CouponEngine;
use crate::domain::{AppliedCoupon, Cart, CartItem, CartStatus, OwnerKey};
use crate::stock::StockLedger;
use crate::store::{CartStore, StoreError};


/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Errors surfaced by the login merge.
///
/// Stock shortfalls never fail a merge; quantities are silently clamped.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("concurrent updates exhausted {attempts} save attempts")]
    ConcurrentUpdate { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reconciles a guest (session) cart into the user's cart at login.
pub struct CartMergeResolver {
    store: Arc<dyn CartStore>,
    ledger: Arc<dyn StockLedger>,
    coupons: Arc<CouponEngine>,
    max_save_attempts: u32,
    guest_ttl: Duration,
}

impl CartMergeResolver {
    pub fn new(
        store: Arc<dyn CartStore>,
        ledger: Arc<dyn StockLedger>,
        coupons: Arc<CouponEngine>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            coupons,
            max_save_attempts: config.limits.max_save_attempts,
            guest_ttl: config.guest.ttl(),
        }
    }

    /// Merge the session's guest cart into the user's active cart and
    /// retire the guest cart. Returns the user's active cart (created on
    /// demand) in every case.
    pub async fn resolve_login_merge(&self, user_id: &str, session_id: &str) -> Result<Cart> {
        let guest_owner = OwnerKey::Session(session_id.to_string());
        let user_owner = OwnerKey::User(user_id.to_string());

        // An absent guest cart covers both "never existed" and "already
        // merged" (terminal carts are not active), so a duplicate login
        // event lands here and is a no-op.
        let Some(guest) = self.store.load_active(&guest_owner).await? else {
            debug!(user = %user_id, session = %session_id, "no active guest cart to merge");
            return self.load_or_create(&user_owner).await;
        };

        if guest.is_empty() {
            self.retire_guest(guest).await?;
            return self.load_or_create(&user_owner).await;
        }

        let mut attempts = 0;
        let merged = loop {
            if attempts >= self.max_save_attempts {
                warn!(user = %user_id, attempts, "merge retry budget exhausted");
                return Err(MergeError::ConcurrentUpdate { attempts });
            }
            attempts += 1;

            let mut user_cart = self.load_or_create(&user_owner).await?;
            self.fold_guest_lines(&mut user_cart, &guest).await;
            user_cart.recompute_subtotal();
            self.settle_coupon(&mut user_cart, &guest);
            user_cart.touch(Utc::now(), self.guest_ttl);

            match self.store.save(&user_cart).await {
                Ok(saved) => break saved,
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(user = %user_id, attempt = attempts, "merge save conflict, replaying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        };

        self.retire_guest(guest).await?;
        info!(
            user = %user_id,
            session = %session_id,
            lines = merged.items.len(),
            "guest cart merged"
        );
        Ok(merged)
    }

    /// Fold each guest line into the user cart, clamping quantities to the
    /// stock that actually exists right now. The merge never raises a line
    /// past `available`, never shrinks a line the user already had, and
    /// never fails outright on a shortfall.
    async fn fold_guest_lines(&self, user_cart: &mut Cart, guest: &Cart) {
        let now = Utc::now();
        for line in &guest.items {
            let available = match self.ledger.available_of(&line.product_id).await {
                Ok(count) => count,
                Err(err) => {
                    debug!(
                        product = %line.product_id,
                        error = %err,
                        "stock read failed during merge, treating as unavailable"
                    );
                    0
                }
            };

            if let Some(existing) = user_cart.line_matching_mut(&line.product_id, &line.attributes)
            {
                let summed = existing.quantity + line.quantity;
                let clamped = summed.min(available).max(existing.quantity);
                if clamped != summed {
                    debug!(
                        product = %line.product_id,
                        wanted = summed,
                        clamped,
                        "merge quantity capped to available stock"
                    );
                }
                existing.quantity = clamped;
                existing.updated_at = now;
            } else {
                let quantity = line.quantity.min(available);
                if quantity == 0 {
                    debug!(product = %line.product_id, "guest line dropped, out of stock");
                    continue;
                }
                user_cart.items.push(CartItem::new(
                    line.product_id.clone(),
                    quantity,
                    line.price_snapshot,
                    line.attributes.clone(),
                    now,
                ));
            }
        }
    }

    /// Re-evaluate whichever coupon survives the merge against the merged
    /// contents; a code that no longer qualifies is dropped, never copied
    /// verbatim.
    fn settle_coupon(&self, user_cart: &mut Cart, guest: &Cart) {
        let code = match (&user_cart.coupon, &guest.coupon) {
            (Some(own), _) => own.code.clone(),
            (None, Some(carried)) => carried.code.clone(),
            (None, None) => return,
        };

        match self.coupons.evaluate(user_cart, &code, Utc::now()) {
            Ok(quote) => {
                user_cart.coupon = Some(AppliedCoupon {
                    code: quote.code,
                    discount: quote.discount,
                    applied_at: Utc::now(),
                });
            }
            Err(err) => {
                debug!(code = %code, error = %err, "coupon dropped during merge");
                user_cart.coupon = None;
            }
        }
    }

    /// Mark the guest cart `Merged` (terminal). Conflicts reload and
    /// re-mark; a cart that reached a terminal state some other way is
    /// left alone.
    async fn retire_guest(&self, mut guest: Cart) -> Result<()> {
        for _ in 0..self.max_save_attempts {
            if guest.status.is_terminal() {
                return Ok(());
            }
            guest.status = CartStatus::Merged;
            match self.store.save(&guest).await {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => {
                    guest = self.store.get(guest.id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(MergeError::ConcurrentUpdate {
            attempts: self.max_save_attempts,
        })
    }

    async fn load_or_create(&self, owner: &OwnerKey) -> Result<Cart> {
        if let Some(cart) = self.store.load_active(owner).await? {
            return Ok(cart);
        }
        match self.store.create_active(owner).await {
            Ok(cart) => Ok(cart),
            Err(StoreError::ActiveCartExists(_)) => {
                match self.store.load_active(owner).await? {
                    Some(cart) => Ok(cart),
                    None => Err(MergeError::Store(StoreError::Unavailable(
                        "active cart vanished during create race".to_string(),
                    ))),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
