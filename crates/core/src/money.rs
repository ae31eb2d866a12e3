//! Fixed-point money representation.
//!
//! All monetary amounts are carried as whole cents (smallest currency unit)
//! so repeated computation can never drift by fractions of a cent.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Basis points per whole (100% == 10_000 bp). Rates such as a tax rate are
/// expressed in basis points so they stay in integer arithmetic.
pub const BASIS_POINTS_PER_WHOLE: i64 = 10_000;

/// An amount of money in whole cents.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Convenience constructor for literals like `Money::from_dollars(9, 99)`.
    pub const fn from_dollars(dollars: i64, cents: i64) -> Self {
        Self(dollars * 100 + cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("money addition overflowed"))
    }

    /// Multiply by a unit count (line total = unit price × quantity).
    pub fn checked_mul(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::validation("money multiplication overflowed"))
    }

    /// Apply a rate given in basis points, rounding half-up to the nearest
    /// cent. Rounding happens exactly once, here; callers must not re-round.
    pub fn apply_rate_bp(self, basis_points: i64) -> DomainResult<Money> {
        let scaled = self
            .0
            .checked_mul(basis_points)
            .ok_or_else(|| DomainError::validation("rate application overflowed"))?;
        // Half-up for non-negative amounts; rates are only applied to
        // non-negative subtotals in this engine.
        let rounded = (scaled + BASIS_POINTS_PER_WHOLE / 2).div_euclid(BASIS_POINTS_PER_WHOLE);
        Ok(Money(rounded))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_dollars_and_cents() {
        assert_eq!(Money::from_cents(3699).to_string(), "$36.99");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-150).to_string(), "-$1.50");
    }

    #[test]
    fn eight_percent_of_twenty_five_dollars_is_two_dollars() {
        let tax = Money::from_dollars(25, 0).apply_rate_bp(800).unwrap();
        assert_eq!(tax, Money::from_dollars(2, 0));
    }

    #[test]
    fn rate_application_rounds_half_up() {
        // 1 cent at 50% is half a cent; half-up lands on 1 cent.
        assert_eq!(
            Money::from_cents(1).apply_rate_bp(5_000).unwrap(),
            Money::from_cents(1)
        );
        // 12.34 at 8% is 98.72 cents; rounds to 99.
        assert_eq!(
            Money::from_cents(1_234).apply_rate_bp(800).unwrap(),
            Money::from_cents(99)
        );
    }

    #[test]
    fn overflow_is_reported_not_wrapped() {
        let err = Money::from_cents(i64::MAX).checked_mul(2).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
