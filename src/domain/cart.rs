//! Cart aggregate: owner identity, line items, derived subtotal, and the
//! optimistic-concurrency version counter.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Money, ProductId};

/// Identity of the cart's owner.
///
/// Exactly one of user or anonymous session, never both. A user and a
/// session can each own at most one `Active` cart at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKey {
    /// Authenticated user identifier.
    User(String),
    /// Anonymous session identifier issued by the HTTP layer.
    Session(String),
}

impl OwnerKey {
    /// Whether this owner is an anonymous session (guest cart).
    pub fn is_session(&self) -> bool {
        matches!(self, OwnerKey::Session(_))
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerKey::User(id) => write!(f, "user:{id}"),
            OwnerKey::Session(id) => write!(f, "session:{id}"),
        }
    }
}

/// Cart lifecycle status.
///
/// `Converted` and `Merged` are terminal. `Abandoned` is reachable only by
/// the background expiry sweep, never by user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    Active,
    Converted,
    Abandoned,
    Merged,
}

impl CartStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, CartStatus::Converted | CartStatus::Merged)
    }
}

/// A single cart line.
///
/// Line identity within a cart is `(product_id, attributes)`; adding the
/// same product with identical attributes increments the existing line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price at time of add; re-validated against the catalog on reads and
    /// never trusted at checkout.
    pub price_snapshot: Money,
    /// Opaque variant selection (size, color, ...).
    pub attributes: BTreeMap<String, String>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        quantity: u32,
        price_snapshot: Money,
        attributes: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: product_id.into(),
            quantity,
            price_snapshot,
            attributes,
            added_at: now,
            updated_at: now,
        }
    }

    /// Line total at the snapshot price.
    pub fn line_total(&self) -> Money {
        self.price_snapshot * Money::from(self.quantity)
    }
}

/// Applied discount record embedded in the cart.
///
/// Recomputed whole, never incrementally updated; any content mutation
/// drops it until the coupon is re-applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount: Money,
    pub applied_at: DateTime<Utc>,
}

/// A shopping cart document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub owner: OwnerKey,
    pub items: Vec<CartItem>,
    /// Derived: always `sum(line_total)` over `items`. Recomputed on every
    /// mutation, never trusted from a stale read.
    pub subtotal: Money,
    pub coupon: Option<AppliedCoupon>,
    pub status: CartStatus,
    /// Incremented by the store on every successful save; the optimistic
    /// concurrency token.
    pub version: u64,
    pub last_activity: DateTime<Utc>,
    /// Guest carts only: TTL-based abandonment deadline.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// Create a fresh active cart. Guest carts carry an expiry deadline.
    pub fn new(owner: OwnerKey, now: DateTime<Utc>, guest_ttl: Duration) -> Self {
        let expires_at = owner.is_session().then(|| now + guest_ttl);
        Self {
            id: Uuid::new_v4(),
            owner,
            items: Vec::new(),
            subtotal: 0,
            coupon: None,
            status: CartStatus::Active,
            version: 0,
            last_activity: now,
            expires_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Recompute the derived subtotal from line items.
    pub fn recompute_subtotal(&mut self) {
        self.subtotal = self.items.iter().map(CartItem::line_total).sum();
    }

    /// Find the line matching `(product_id, attributes)`.
    pub fn line_matching(
        &self,
        product_id: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|i| i.product_id == product_id && &i.attributes == attributes)
    }

    /// Mutable variant of [`Cart::line_matching`].
    pub fn line_matching_mut(
        &mut self,
        product_id: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Option<&mut CartItem> {
        self.items
            .iter_mut()
            .find(|i| i.product_id == product_id && &i.attributes == attributes)
    }

    pub fn line_by_id(&self, item_id: Uuid) -> Option<&CartItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn line_by_id_mut(&mut self, item_id: Uuid) -> Option<&mut CartItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    /// Refresh activity time and push out the guest expiry deadline.
    pub fn touch(&mut self, now: DateTime<Utc>, guest_ttl: Duration) {
        self.last_activity = now;
        if self.owner.is_session() {
            self.expires_at = Some(now + guest_ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_subtotal_recompute() {
        let now = Utc::now();
        let mut cart = Cart::new(OwnerKey::User("u1".into()), now, Duration::days(7));
        cart.items
            .push(CartItem::new("p1", 2, 1_500_000, BTreeMap::new(), now));
        cart.items
            .push(CartItem::new("p2", 1, 250_000, BTreeMap::new(), now));
        cart.recompute_subtotal();
        assert_eq!(cart.subtotal, 3_250_000);
    }

    #[test]
    fn test_line_identity_includes_attributes() {
        let now = Utc::now();
        let mut cart = Cart::new(OwnerKey::User("u1".into()), now, Duration::days(7));
        cart.items
            .push(CartItem::new("p1", 1, 100, attrs(&[("size", "m")]), now));

        assert!(cart.line_matching("p1", &attrs(&[("size", "m")])).is_some());
        assert!(cart.line_matching("p1", &attrs(&[("size", "l")])).is_none());
        assert!(cart.line_matching("p1", &BTreeMap::new()).is_none());
    }

    #[test]
    fn test_guest_cart_gets_expiry() {
        let now = Utc::now();
        let guest = Cart::new(OwnerKey::Session("s1".into()), now, Duration::days(7));
        assert_eq!(guest.expires_at, Some(now + Duration::days(7)));

        let user = Cart::new(OwnerKey::User("u1".into()), now, Duration::days(7));
        assert!(user.expires_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CartStatus::Converted.is_terminal());
        assert!(CartStatus::Merged.is_terminal());
        assert!(!CartStatus::Active.is_terminal());
        assert!(!CartStatus::Abandoned.is_terminal());
    }
}
