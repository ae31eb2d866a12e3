use serde::{Deserialize, Serialize};

use ordermill_core::{DomainError, DomainResult, Money};

/// Pricing knobs. Defaults mirror the storefront rules: 8% tax, free
/// shipping on subtotals strictly over $50.00, otherwise a $9.99 flat fee.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub tax_rate_bp: i64,
    pub free_shipping_threshold: Money,
    pub flat_shipping_fee: Money,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate_bp: 800,
            free_shipping_threshold: Money::from_dollars(50, 0),
            flat_shipping_fee: Money::from_dollars(9, 99),
        }
    }
}

/// One priced line as the calculator sees it: the unit price already frozen
/// by the cart snapshot, and how many units are being bought.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePrice {
    pub unit_price: Money,
    pub quantity: i64,
}

/// The four charge fields of an order, all in cents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
}

impl PricingPolicy {
    /// Price a set of lines.
    ///
    /// Subtotal is the exact sum of `unit_price * quantity` per line; tax is
    /// the policy rate applied to the subtotal, rounded half-up once;
    /// shipping is waived only when the subtotal strictly exceeds the
    /// threshold (a subtotal of exactly $50.00 still pays the flat fee).
    pub fn price<'a, I>(&self, lines: I) -> DomainResult<PriceBreakdown>
    where
        I: IntoIterator<Item = &'a LinePrice>,
    {
        let mut subtotal = Money::ZERO;
        for line in lines {
            if line.quantity < 1 {
                return Err(DomainError::validation("quantity must be at least 1"));
            }
            if line.unit_price.is_negative() {
                return Err(DomainError::validation("unit price cannot be negative"));
            }
            subtotal = subtotal.checked_add(line.unit_price.checked_mul(line.quantity)?)?;
        }

        let tax = subtotal.apply_rate_bp(self.tax_rate_bp)?;
        let shipping = if subtotal > self.free_shipping_threshold {
            Money::ZERO
        } else {
            self.flat_shipping_fee
        };
        let total = subtotal.checked_add(tax)?.checked_add(shipping)?;

        Ok(PriceBreakdown { subtotal, tax, shipping, total })
    }
}
