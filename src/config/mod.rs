//! Core configuration.
//!
//! Serde-deserializable structs with documented defaults, loadable from a
//! YAML file plus `CARTWHEEL_*` environment overrides.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::domain::Money;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "cartwheel.yaml";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CARTWHEEL";

/// Default bound on optimistic-save attempts per cart operation.
pub const DEFAULT_MAX_SAVE_ATTEMPTS: u32 = 5;
/// Default guest cart time-to-live in days.
pub const DEFAULT_GUEST_TTL_DAYS: i64 = 7;
/// Default flat standard shipping rate (smallest currency unit).
pub const DEFAULT_STANDARD_RATE: Money = 30_000;
/// Default flat express shipping rate (smallest currency unit).
pub const DEFAULT_EXPRESS_RATE: Money = 60_000;
/// Default multiplier applied to non-domestic shipments.
pub const DEFAULT_INTERNATIONAL_MULTIPLIER: i64 = 3;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Retry bounds for optimistic cart writes.
///
/// Conflicts are rare and cheap to resolve, so retries run back-to-back
/// with no sleep; exhaustion surfaces as `ConcurrentUpdate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    /// Maximum save attempts per logical cart mutation.
    ///
    /// Default: 5.
    pub max_save_attempts: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_save_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
        }
    }
}

/// Guest (session) cart lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuestCartConfig {
    /// Days of inactivity before a guest cart is eligible for the
    /// abandonment sweep.
    ///
    /// Default: 7.
    pub ttl_days: i64,
}

impl Default for GuestCartConfig {
    fn default() -> Self {
        Self {
            ttl_days: DEFAULT_GUEST_TTL_DAYS,
        }
    }
}

impl GuestCartConfig {
    pub fn ttl(&self) -> Duration {
        Duration::days(self.ttl_days)
    }
}

/// Shipping cost policy: flat rate per method, multiplied for
/// international destinations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShippingConfig {
    /// Flat rate for standard shipping. Default: 30,000.
    pub standard_rate: Money,
    /// Flat rate for express shipping. Default: 60,000.
    pub express_rate: Money,
    /// Multiplier for non-domestic destinations. Default: 3.
    pub international_multiplier: i64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            standard_rate: DEFAULT_STANDARD_RATE,
            express_rate: DEFAULT_EXPRESS_RATE,
            international_multiplier: DEFAULT_INTERNATIONAL_MULTIPLIER,
        }
    }
}

impl ShippingConfig {
    /// Cost for a method/destination combination.
    pub fn cost(&self, method: crate::domain::ShippingMethod, international: bool) -> Money {
        let base = match method {
            crate::domain::ShippingMethod::Standard => self.standard_rate,
            crate::domain::ShippingMethod::Express => self.express_rate,
        };
        if international {
            base * self.international_multiplier
        } else {
            base
        }
    }
}

/// One configured coupon rule (percentage-off).
#[derive(Debug, Clone, Deserialize)]
pub struct CouponRuleConfig {
    pub code: String,
    pub percent: u32,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_subtotal: Option<Money>,
}

/// Top-level configuration for the cart core.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub limits: RetryLimits,
    pub guest: GuestCartConfig,
    pub shipping: ShippingConfig,
    pub coupons: Vec<CouponRuleConfig>,
}

impl CoreConfig {
    /// Load from `path` (optional file) with `CARTWHEEL_*` environment
    /// overrides, e.g. `CARTWHEEL_LIMITS__MAX_SAVE_ATTEMPTS=10`.
    pub fn load(path: &str) -> std::result::Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
