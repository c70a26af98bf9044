//! Cartwheel - Cart & Inventory Consistency Core
//!
//! Coordinates shopping-cart mutation, finite stock accounting, login-time
//! cart reconciliation, and cart-to-order conversion so that stock is never
//! oversold and concurrent writers never silently clobber each other.
//!
//! Storage is reached only through trait seams ([`store::CartStore`],
//! [`stock::StockLedger`], [`store::OrderStore`], [`catalog::ProductCatalog`]);
//! in-memory reference implementations back the test suite and local
//! development.

pub mod catalog;
pub mod checkout;
pub mod config;
pub mod coupon;
pub mod domain;
pub mod manager;
pub mod merge;
pub mod stock;
pub mod store;
pub mod sweep;
