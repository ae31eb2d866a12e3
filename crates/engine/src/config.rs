use ordermill_core::{DomainError, DomainResult, Money};
use ordermill_pricing::PricingPolicy;

/// Engine configuration. Everything defaults to the storefront's historical
/// constants; `from_env` lets deployments override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub pricing: PricingPolicy,
    /// How many order numbers to try before giving up on a creation that
    /// keeps colliding with existing numbers.
    pub max_order_number_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pricing: PricingPolicy::default(),
            max_order_number_attempts: 5,
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults for
    /// unset variables. Malformed values are reported, not ignored.
    ///
    /// Recognized variables: `ORDERMILL_TAX_RATE_BP`,
    /// `ORDERMILL_FREE_SHIPPING_CENTS`, `ORDERMILL_FLAT_SHIPPING_CENTS`,
    /// `ORDERMILL_ORDER_NUMBER_ATTEMPTS`.
    pub fn from_env() -> DomainResult<Self> {
        let mut config = Self::default();
        if let Some(rate) = env_i64("ORDERMILL_TAX_RATE_BP")? {
            if rate < 0 {
                return Err(DomainError::validation("tax rate cannot be negative"));
            }
            config.pricing.tax_rate_bp = rate;
        }
        if let Some(cents) = env_i64("ORDERMILL_FREE_SHIPPING_CENTS")? {
            config.pricing.free_shipping_threshold = Money::from_cents(cents);
        }
        if let Some(cents) = env_i64("ORDERMILL_FLAT_SHIPPING_CENTS")? {
            config.pricing.flat_shipping_fee = Money::from_cents(cents);
        }
        if let Some(attempts) = env_i64("ORDERMILL_ORDER_NUMBER_ATTEMPTS")? {
            if attempts < 1 {
                return Err(DomainError::validation(
                    "order number attempts must be at least 1",
                ));
            }
            config.max_order_number_attempts = attempts as u32;
        }
        Ok(config)
    }
}

fn env_i64(name: &str) -> DomainResult<Option<i64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| DomainError::validation(format!("{name} is not an integer: '{raw}'"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(DomainError::validation(format!("{name} is not valid UTF-8")))
        }
    }
}
