//! Order: the terminal artifact of a successful checkout.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Money, ProductId};

/// Order lifecycle status. Only `Pending` is assigned by this core;
/// later transitions belong to the fulfillment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

/// Shipping method selected at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Standard,
    Express,
}

/// A frozen order line. Prices are the catalog prices at conversion time,
/// never the cart's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    pub attributes: BTreeMap<String, String>,
}

/// An order document. Created exactly once by the placement coordinator;
/// either it exists with consistent totals and the matching stock decrement
/// succeeded, or it does not exist at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Human-readable number from the generator collaborator. Unique;
    /// gaps acceptable, duplicates are not.
    pub order_number: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub discount: Money,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Cart this order was converted from, if any.
    pub source_cart: Option<Uuid>,
}
