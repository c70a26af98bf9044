//! Guest-cart abandonment sweep.
//!
//! The only path to the `Abandoned` status. Runs on whatever schedule the
//! host process chooses; each pass moves expired guest carts out of the
//! active slot through ordinary versioned saves, so it can never clobber a
//! shopper who comes back mid-sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::CartStatus;
use crate::store::{CartStore, Result, StoreError};

/// Expires inactive guest carts.
pub struct CartSweeper {
    store: Arc<dyn CartStore>,
}

impl CartSweeper {
    pub fn new(store: Arc<dyn CartStore>) -> Self {
        Self { store }
    }

    /// Mark every expired active guest cart `Abandoned`.
    ///
    /// A version conflict means the owner touched the cart after we read
    /// it; the save pushed the expiry forward, so the cart is simply
    /// skipped until a later pass.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.store.expired_guest_carts(now).await?;
        let mut swept = 0;

        for mut cart in expired {
            cart.status = CartStatus::Abandoned;
            match self.store.save(&cart).await {
                Ok(_) => swept += 1,
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(cart = %cart.id, "cart touched during sweep, skipping");
                }
                Err(err) => return Err(err),
            }
        }

        if swept > 0 {
            info!(swept, "abandoned expired guest carts");
        }
        Ok(swept)
    }
}
