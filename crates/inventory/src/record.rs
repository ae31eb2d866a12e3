use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordermill_core::{DomainError, DomainResult, LocationId, ProductId};

/// Classification of a record's quantity against its stocking thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Low,
    Normal,
    High,
}

/// Quantity on hand for one product at one stocking location.
///
/// Unique per `(product, location)` pair. Quantity is mutated only through
/// [`InventoryRecord::apply_delta`], which rejects any change that would
/// drive it negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub location_id: LocationId,
    quantity: i64,
    pub min_stock_level: i64,
    pub max_stock_level: i64,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn new(
        product_id: ProductId,
        location_id: LocationId,
        quantity: i64,
        min_stock_level: i64,
        max_stock_level: i64,
    ) -> DomainResult<Self> {
        if quantity < 0 || min_stock_level < 0 || max_stock_level < 0 {
            return Err(DomainError::validation("all quantities must be non-negative"));
        }
        if min_stock_level > max_stock_level {
            return Err(DomainError::validation(
                "minimum stock level cannot be greater than maximum stock level",
            ));
        }

        Ok(Self {
            product_id,
            location_id,
            quantity,
            min_stock_level,
            max_stock_level,
            updated_at: Utc::now(),
        })
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Apply a signed quantity change, returning `(previous, new)`.
    ///
    /// A delta that would make the quantity negative is rejected entirely,
    /// not clamped.
    pub fn apply_delta(&mut self, delta: i64) -> DomainResult<(i64, i64)> {
        let previous = self.quantity;
        let new = previous
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("quantity adjustment overflowed"))?;

        if new < 0 {
            return Err(DomainError::insufficient_stock(
                self.product_id,
                -delta,
                previous,
            ));
        }

        self.quantity = new;
        self.updated_at = Utc::now();
        Ok((previous, new))
    }

    pub fn stock_level(&self) -> StockLevel {
        if self.quantity <= self.min_stock_level {
            StockLevel::Low
        } else if self.quantity >= self.max_stock_level {
            StockLevel::High
        } else {
            StockLevel::Normal
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_level() == StockLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(quantity: i64) -> InventoryRecord {
        InventoryRecord::new(ProductId::new(), LocationId::new(), quantity, 10, 1_000).unwrap()
    }

    #[test]
    fn min_greater_than_max_is_rejected() {
        let err =
            InventoryRecord::new(ProductId::new(), LocationId::new(), 5, 100, 10).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn negative_quantity_is_rejected_at_construction() {
        let err =
            InventoryRecord::new(ProductId::new(), LocationId::new(), -1, 0, 10).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn apply_delta_reports_previous_and_new() {
        let mut rec = record(50);
        assert_eq!(rec.apply_delta(-20).unwrap(), (50, 30));
        assert_eq!(rec.apply_delta(5).unwrap(), (30, 35));
    }

    #[test]
    fn delta_below_zero_is_rejected_not_clamped() {
        let mut rec = record(3);
        let err = rec.apply_delta(-4).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            }
        ));
        assert_eq!(rec.quantity(), 3);
    }

    #[test]
    fn stock_level_classification() {
        assert_eq!(record(10).stock_level(), StockLevel::Low);
        assert_eq!(record(11).stock_level(), StockLevel::Normal);
        assert_eq!(record(1_000).stock_level(), StockLevel::High);
    }
}
