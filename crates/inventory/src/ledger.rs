//! Pure reservation planning.
//!
//! `allocate` turns "reserve N units of each of these products" into concrete
//! per-location decrements, checking availability summed across every
//! stocking location. It is deterministic and has no side effects; a store
//! backend applies the returned lots inside its own atomic unit so
//! check-then-decrement can never interleave with another reservation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ordermill_core::{DomainError, DomainResult, LocationId, ProductId};

use crate::record::InventoryRecord;

/// One requested (product, quantity) pairing of a reservation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// A planned (and later, executed) decrement against one stocking location.
///
/// Lots are recorded with the order they belong to so cancellation can
/// release exactly the reserved quantities, location by location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedLot {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
}

/// Quantity available for one product, summed across all stocking locations.
pub fn available(records: &[InventoryRecord], product_id: ProductId) -> i64 {
    records
        .iter()
        .filter(|r| r.product_id == product_id)
        .map(|r| r.quantity())
        .sum()
}

/// Plan an all-or-nothing reservation.
///
/// Every request must be coverable by the summed availability of its product;
/// if any single line falls short the whole plan fails with
/// `InsufficientStock` and no partial result. Requests for the same product
/// are merged before planning. Locations are drained in id order (most
/// deterministic, not smartest) so replanning over identical records yields
/// identical lots.
pub fn allocate(
    records: &[InventoryRecord],
    requests: &[StockLine],
) -> DomainResult<Vec<ReservedLot>> {
    let mut merged: BTreeMap<ProductId, i64> = BTreeMap::new();
    for line in requests {
        if line.quantity < 1 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        *merged.entry(line.product_id).or_insert(0) += line.quantity;
    }

    let mut lots = Vec::new();
    for (product_id, requested) in merged {
        let mut sources: Vec<&InventoryRecord> = records
            .iter()
            .filter(|r| r.product_id == product_id)
            .collect();
        sources.sort_by_key(|r| r.location_id);

        let on_hand: i64 = sources.iter().map(|r| r.quantity()).sum();
        if on_hand < requested {
            return Err(DomainError::insufficient_stock(product_id, requested, on_hand));
        }

        let mut remaining = requested;
        for record in sources {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(record.quantity());
            if take == 0 {
                continue;
            }
            lots.push(ReservedLot {
                product_id,
                location_id: record.location_id,
                quantity: take,
            });
            remaining -= take;
        }
    }

    Ok(lots)
}
