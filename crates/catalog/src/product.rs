use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordermill_core::{DomainError, DomainResult, Money, ProductId};

/// A sellable catalog product.
///
/// Orders never reference these prices after creation: the unit price is
/// copied onto the order line item at purchase time, so later edits here
/// cannot change a committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub active: bool,
    /// Unit retail price charged to the shopper.
    pub retail_price: Money,
    /// Unit acquisition cost (inventory valuation, not customer-facing).
    pub cost: Money,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        retail_price: Money,
        cost: Money,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();

        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if retail_price.is_negative() || cost.is_negative() {
            return Err(DomainError::validation("prices cannot be negative"));
        }

        Ok(Self {
            id,
            sku,
            name,
            active: true,
            retail_price,
            cost,
            created_at: Utc::now(),
        })
    }

    /// Check if the product can be sold (inactive products are excluded from
    /// cart snapshots and order creation).
    pub fn can_be_sold(&self) -> bool {
        self.active
    }
}

/// Read-only product lookup consumed by the engine.
pub trait Catalog {
    fn product(&self, id: ProductId) -> Option<Product>;
}
