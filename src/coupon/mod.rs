//! Coupon evaluation.
//!
//! The engine is a pure function of (cart contents, code, current time,
//! rule set): no persistence, no side effects. Callers re-evaluate whenever
//! the cart composition changes so a stale discount never survives an item
//! removal.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::CouponRuleConfig;
use crate::domain::{Cart, Money};

/// Result type for coupon evaluation.
pub type Result<T> = std::result::Result<T, CouponError>;

/// Errors from coupon evaluation. All are business rejections.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CouponError {
    #[error("invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("coupon not applicable: {0}")]
    NotApplicable(String),

    #[error("cart is empty")]
    EmptyCart,
}

/// A computed discount for a coupon code against one cart snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponQuote {
    pub code: String,
    pub discount: Money,
}

/// A single discount rule. The engine looks rules up by code; additional
/// rule types plug in through this trait.
pub trait CouponRule: Send + Sync {
    fn code(&self) -> &str;

    /// Compute the discount for a non-empty cart, or reject.
    fn evaluate(&self, cart: &Cart, now: DateTime<Utc>) -> Result<Money>;
}

/// Fixed-percentage discount with an optional validity window and an
/// optional minimum subtotal.
pub struct PercentOffRule {
    code: String,
    percent: u32,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    min_subtotal: Option<Money>,
}

impl PercentOffRule {
    /// Percentages above 100 are clamped; a discount can never exceed the
    /// subtotal it applies to.
    pub fn new(code: impl Into<String>, percent: u32) -> Self {
        Self {
            code: code.into(),
            percent: percent.min(100),
            valid_from: None,
            valid_until: None,
            min_subtotal: None,
        }
    }

    pub fn valid_between(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    pub fn min_subtotal(mut self, floor: Money) -> Self {
        self.min_subtotal = Some(floor);
        self
    }
}

impl CouponRule for PercentOffRule {
    fn code(&self) -> &str {
        &self.code
    }

    fn evaluate(&self, cart: &Cart, now: DateTime<Utc>) -> Result<Money> {
        if self.valid_from.is_some_and(|from| now < from)
            || self.valid_until.is_some_and(|until| now > until)
        {
            return Err(CouponError::InvalidCoupon(self.code.clone()));
        }

        if let Some(floor) = self.min_subtotal {
            if cart.subtotal < floor {
                return Err(CouponError::NotApplicable(format!(
                    "subtotal below minimum of {floor}"
                )));
            }
        }

        // Half-up rounding of subtotal * percent / 100.
        Ok((cart.subtotal * Money::from(self.percent) + 50) / 100)
    }
}

/// Code-indexed rule set.
#[derive(Default)]
pub struct CouponEngine {
    rules: HashMap<String, Arc<dyn CouponRule>>,
}

impl CouponEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the rule set from configuration.
    pub fn from_config(rules: &[CouponRuleConfig]) -> Self {
        let mut engine = Self::new();
        for rule in rules {
            if rule.percent > 100 {
                warn!(code = %rule.code, percent = rule.percent, "coupon percent clamped to 100");
            }
            let mut percent = PercentOffRule::new(&rule.code, rule.percent)
                .valid_between(rule.valid_from, rule.valid_until);
            if let Some(floor) = rule.min_subtotal {
                percent = percent.min_subtotal(floor);
            }
            engine.register(Arc::new(percent));
        }
        engine
    }

    pub fn register(&mut self, rule: Arc<dyn CouponRule>) {
        self.rules.insert(rule.code().to_string(), rule);
    }

    /// Evaluate `code` against a cart snapshot.
    ///
    /// Coupons are rejected outright on an empty cart.
    pub fn evaluate(&self, cart: &Cart, code: &str, now: DateTime<Utc>) -> Result<CouponQuote> {
        if cart.is_empty() {
            return Err(CouponError::EmptyCart);
        }

        let rule = self
            .rules
            .get(code)
            .ok_or_else(|| CouponError::InvalidCoupon(code.to_string()))?;

        let discount = rule.evaluate(cart, now)?;
        Ok(CouponQuote {
            code: code.to_string(),
            discount,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;

    use super::*;
    use crate::domain::{CartItem, OwnerKey};

    fn cart_with_subtotal(subtotal: Money) -> Cart {
        let now = Utc::now();
        let mut cart = Cart::new(OwnerKey::User("u1".into()), now, Duration::days(7));
        cart.items
            .push(CartItem::new("p1", 1, subtotal, BTreeMap::new(), now));
        cart.recompute_subtotal();
        cart
    }

    fn engine_with(rule: PercentOffRule) -> CouponEngine {
        let mut engine = CouponEngine::new();
        engine.register(Arc::new(rule));
        engine
    }

    #[test]
    fn test_percent_discount_with_rounding() {
        let engine = engine_with(PercentOffRule::new("SAVE10", 10));
        let quote = engine
            .evaluate(&cart_with_subtotal(1_000_000), "SAVE10", Utc::now())
            .unwrap();
        assert_eq!(quote.discount, 100_000);

        // 10% of 5 rounds half-up to 1.
        let quote = engine
            .evaluate(&cart_with_subtotal(5), "SAVE10", Utc::now())
            .unwrap();
        assert_eq!(quote.discount, 1);
    }

    #[test]
    fn test_unknown_code_is_invalid() {
        let engine = CouponEngine::new();
        assert!(matches!(
            engine.evaluate(&cart_with_subtotal(1000), "NOPE", Utc::now()),
            Err(CouponError::InvalidCoupon(_))
        ));
    }

    #[test]
    fn test_empty_cart_rejected_before_lookup() {
        let engine = engine_with(PercentOffRule::new("SAVE10", 10));
        let now = Utc::now();
        let empty = Cart::new(OwnerKey::User("u1".into()), now, Duration::days(7));
        assert!(matches!(
            engine.evaluate(&empty, "SAVE10", now),
            Err(CouponError::EmptyCart)
        ));
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let expired = PercentOffRule::new("OLD", 10)
            .valid_between(None, Some(now - Duration::days(1)));
        let engine = engine_with(expired);
        assert!(matches!(
            engine.evaluate(&cart_with_subtotal(1000), "OLD", now),
            Err(CouponError::InvalidCoupon(_))
        ));
    }

    #[test]
    fn test_overlarge_percent_clamps_at_full_subtotal() {
        let engine = CouponEngine::from_config(&[CouponRuleConfig {
            code: "WILD".into(),
            percent: 150,
            valid_from: None,
            valid_until: None,
            min_subtotal: None,
        }]);
        let quote = engine
            .evaluate(&cart_with_subtotal(1000), "WILD", Utc::now())
            .unwrap();
        assert_eq!(quote.discount, 1000);
    }

    #[test]
    fn test_min_subtotal_floor() {
        let engine = engine_with(PercentOffRule::new("BIG", 10).min_subtotal(500_000));
        assert!(matches!(
            engine.evaluate(&cart_with_subtotal(100_000), "BIG", Utc::now()),
            Err(CouponError::NotApplicable(_))
        ));
        assert!(engine
            .evaluate(&cart_with_subtotal(600_000), "BIG", Utc::now())
            .is_ok());
    }
}
