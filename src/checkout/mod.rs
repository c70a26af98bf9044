//! Order placement: the cart → order conversion transaction.
//!
//! There is no two-phase commit across the stock store and the order store.
//! Correctness comes from ordering plus compensation: decrement per line,
//! and on any later failure reverse every decrement this attempt made
//! before surfacing the error. A failed checkout's net effect on stock is
//! always zero; an increment that itself fails is the one condition logged
//! at `error!` for operational escalation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogError, ProductCatalog};
use crate::config::{CoreConfig, ShippingConfig};
use crate::coupon::CouponEngine;
use crate::domain::{
    Cart, CartStatus, Money, Order, OrderItem, OrderStatus, OwnerKey, ProductId, ShippingMethod,
};
use crate::stock::{StockError, StockLedger};
use crate::store::{CartStore, OrderNumberGenerator, OrderStore, StoreError};

mod journal;

pub use journal::{MemoryReservationJournal, ReservationEntry, ReservationJournal, ReservationState};

/// Result type for checkout operations.
pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Errors surfaced by order placement.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("cart not found")]
    CartNotFound,

    #[error("cart belongs to a different owner")]
    Forbidden,

    #[error("cart is not active")]
    CartNotActive,

    #[error("nothing to order")]
    CartEmpty,

    #[error("quantity must be at least 1")]
    InvalidQuantity,

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

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CartNotFound(_) => CheckoutError::CartNotFound,
            other => CheckoutError::Store(other),
        }
    }
}

impl From<CatalogError> for CheckoutError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => CheckoutError::ProductNotFound(id),
            CatalogError::Unavailable(reason) => CheckoutError::CatalogUnavailable(reason),
        }
    }
}

/// Where the order's items come from.
pub enum OrderSource {
    /// Convert the referenced cart; it must be active and owned by the
    /// requesting user.
    Cart(Uuid),
    /// Explicit item list, no cart involved.
    Items(Vec<OrderLineRequest>),
}

/// One requested line for an explicit-items order.
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub attributes: BTreeMap<String, String>,
}

/// A checkout request.
pub struct OrderRequest {
    pub source: OrderSource,
    pub shipping_method: ShippingMethod,
    pub international: bool,
}

/// A line after re-pricing from the catalog.
struct PricedLine {
    product_id: ProductId,
    quantity: u32,
    unit_price: Money,
    attributes: BTreeMap<String, String>,
}

/// Converts a cart (or explicit item list) into an order.
pub struct OrderPlacementCoordinator {
    store: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    ledger: Arc<dyn StockLedger>,
    catalog: Arc<dyn ProductCatalog>,
    coupons: Arc<CouponEngine>,
    numbers: Arc<dyn OrderNumberGenerator>,
    journal: Arc<dyn ReservationJournal>,
    shipping: ShippingConfig,
    max_save_attempts: u32,
}

impl OrderPlacementCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CartStore>,
        orders: Arc<dyn OrderStore>,
        ledger: Arc<dyn StockLedger>,
        catalog: Arc<dyn ProductCatalog>,
        coupons: Arc<CouponEngine>,
        numbers: Arc<dyn OrderNumberGenerator>,
        journal: Arc<dyn ReservationJournal>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            store,
            orders,
            ledger,
            catalog,
            coupons,
            numbers,
            journal,
            shipping: config.shipping.clone(),
            max_save_attempts: config.limits.max_save_attempts,
        }
    }

    /// Place an order for `user_id`.
    ///
    /// All-or-nothing from the caller's point of view: on any failure after
    /// the first decrement, every decrement this attempt made is reversed
    /// before the error is returned.
    pub async fn place_order(&self, user_id: &str, request: OrderRequest) -> Result<Order> {
        // Steps 1-2: resolve and re-price. Pure validation, no side effects.
        let (source_cart, lines) = self.resolve_items(user_id, &request.source).await?;
        let priced = self.reprice(&lines).await?;

        let attempt_id = Uuid::new_v4();
        let movements: Vec<(ProductId, u32)> = priced
            .iter()
            .map(|l| (l.product_id.clone(), l.quantity))
            .collect();
        self.journal.open(attempt_id, user_id, movements).await?;

        // Step 3: decrement line by line, reversing on first failure.
        let mut decremented: Vec<(ProductId, u32)> = Vec::with_capacity(priced.len());
        for line in &priced {
            match self.ledger.try_decrement(&line.product_id, line.quantity).await {
                Ok(_) => decremented.push((line.product_id.clone(), line.quantity)),
                Err(StockError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                }) => {
                    self.release(&decremented).await;
                    self.close_released(attempt_id).await;
                    return Err(CheckoutError::InsufficientStock {
                        product_id,
                        requested,
                        available,
                    });
                }
                Err(StockError::UnknownProduct(id)) => {
                    self.release(&decremented).await;
                    self.close_released(attempt_id).await;
                    return Err(CheckoutError::ProductNotFound(id));
                }
            }
        }

        // Step 4: totals.
        let subtotal: Money = priced
            .iter()
            .map(|l| l.unit_price * Money::from(l.quantity))
            .sum();
        let shipping_cost = self
            .shipping
            .cost(request.shipping_method, request.international);
        let discount = self.settle_discount(source_cart.as_ref(), &priced, subtotal);
        let total_amount = subtotal + shipping_cost - discount;

        let order = Order {
            id: Uuid::new_v4(),
            order_number: self.numbers.next_number(),
            user_id: user_id.to_string(),
            items: priced
                .into_iter()
                .map(|l| OrderItem {
                    total_price: l.unit_price * Money::from(l.quantity),
                    product_id: l.product_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    attributes: l.attributes,
                })
                .collect(),
            subtotal,
            shipping_cost,
            discount,
            total_amount,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            source_cart: source_cart.as_ref().map(|c| c.id),
        };

        // Step 5: persist; compensate every decrement if it fails.
        let order = match self.orders.insert(order).await {
            Ok(order) => order,
            Err(err) => {
                warn!(user = %user_id, error = %err, "order persist failed, reversing decrements");
                self.release(&decremented).await;
                self.close_released(attempt_id).await;
                return Err(err.into());
            }
        };

        if let Err(err) = self
            .journal
            .mark_completed(attempt_id, &order.order_number)
            .await
        {
            warn!(attempt = %attempt_id, error = %err, "failed to close reservation entry");
        }

        // Step 6: close the source cart. The order is the source of truth
        // now; a cart stuck active is cleanup, not a correctness failure.
        if let Some(cart) = source_cart {
            self.mark_converted(cart).await;
        }

        info!(
            user = %user_id,
            order_number = %order.order_number,
            total = order.total_amount,
            "order placed"
        );
        Ok(order)
    }

    async fn resolve_items(
        &self,
        user_id: &str,
        source: &OrderSource,
    ) -> Result<(Option<Cart>, Vec<OrderLineRequest>)> {
        match source {
            OrderSource::Cart(cart_id) => {
                let cart = self.store.get(*cart_id).await?;
                if cart.owner != OwnerKey::User(user_id.to_string()) {
                    return Err(CheckoutError::Forbidden);
                }
                if cart.status != CartStatus::Active {
                    return Err(CheckoutError::CartNotActive);
                }
                if cart.is_empty() {
                    return Err(CheckoutError::CartEmpty);
                }
                let lines = cart
                    .items
                    .iter()
                    .map(|i| OrderLineRequest {
                        product_id: i.product_id.clone(),
                        quantity: i.quantity,
                        attributes: i.attributes.clone(),
                    })
                    .collect();
                Ok((Some(cart), lines))
            }
            OrderSource::Items(lines) => {
                if lines.is_empty() {
                    return Err(CheckoutError::CartEmpty);
                }
                if lines.iter().any(|l| l.quantity == 0) {
                    return Err(CheckoutError::InvalidQuantity);
                }
                let lines = lines
                    .iter()
                    .map(|l| OrderLineRequest {
                        product_id: l.product_id.clone(),
                        quantity: l.quantity,
                        attributes: l.attributes.clone(),
                    })
                    .collect();
                Ok((None, lines))
            }
        }
    }

    /// Re-price every line from the catalog. Cart snapshots are never
    /// trusted at checkout.
    async fn reprice(&self, lines: &[OrderLineRequest]) -> Result<Vec<PricedLine>> {
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self.catalog.get_product(&line.product_id).await?;
            if !product.is_active {
                return Err(CheckoutError::ProductInactive(line.product_id.clone()));
            }
            priced.push(PricedLine {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_price: product.effective_price(),
                attributes: line.attributes.clone(),
            });
        }
        Ok(priced)
    }

    /// Re-evaluate the source cart's coupon against the re-priced totals.
    /// A coupon that no longer qualifies drops the discount rather than
    /// failing the checkout.
    fn settle_discount(
        &self,
        source_cart: Option<&Cart>,
        priced: &[PricedLine],
        subtotal: Money,
    ) -> Money {
        let Some(cart) = source_cart else { return 0 };
        let Some(coupon) = &cart.coupon else { return 0 };

        let mut snapshot = cart.clone();
        snapshot.items = priced
            .iter()
            .map(|l| {
                crate::domain::CartItem::new(
                    l.product_id.clone(),
                    l.quantity,
                    l.unit_price,
                    l.attributes.clone(),
                    Utc::now(),
                )
            })
            .collect();
        snapshot.subtotal = subtotal;

        match self.coupons.evaluate(&snapshot, &coupon.code, Utc::now()) {
            Ok(quote) => quote.discount,
            Err(err) => {
                warn!(code = %coupon.code, error = %err, "coupon failed at checkout, discount dropped");
                0
            }
        }
    }

    /// Reverse decrements. An increment that fails here leaves `available`
    /// understated until manually corrected, hence the escalation log.
    async fn release(&self, decremented: &[(ProductId, u32)]) {
        for (product_id, quantity) in decremented {
            if let Err(err) = self.ledger.increment(product_id, *quantity).await {
                error!(
                    product = %product_id,
                    quantity,
                    error = %err,
                    "COMPENSATION FAILED: stock re-increment lost, available understated"
                );
            }
        }
    }

    async fn close_released(&self, attempt_id: Uuid) {
        if let Err(err) = self.journal.mark_released(attempt_id).await {
            warn!(attempt = %attempt_id, error = %err, "failed to close reservation entry");
        }
    }

    /// Mark the source cart `Converted`. Best-effort: conflicts reload and
    /// retry within the usual bound, and a final failure is logged only.
    async fn mark_converted(&self, mut cart: Cart) {
        for _ in 0..self.max_save_attempts {
            if cart.status.is_terminal() {
                return;
            }
            cart.status = CartStatus::Converted;
            match self.store.save(&cart).await {
                Ok(_) => return,
                Err(StoreError::VersionConflict { .. }) => match self.store.get(cart.id).await {
                    Ok(fresh) => cart = fresh,
                    Err(err) => {
                        warn!(cart = %cart.id, error = %err, "could not reload cart to close it");
                        return;
                    }
                },
                Err(err) => {
                    warn!(cart = %cart.id, error = %err, "failed to close converted cart");
                    return;
                }
            }
        }
        warn!(cart = %cart.id, "gave up closing converted cart");
    }
}
