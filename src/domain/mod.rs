//! Domain value types shared across the core.

mod cart;
mod order;

pub use cart::{AppliedCoupon, Cart, CartItem, CartStatus, OwnerKey};
pub use order::{Order, OrderItem, OrderStatus, ShippingMethod};

/// Monetary amount in the smallest currency unit.
pub type Money = i64;

/// Product identifier as issued by the product catalog.
pub type ProductId = String;
