use serde::{Deserialize, Serialize};

use ordermill_catalog::Catalog;
use ordermill_core::{DomainError, DomainResult, Money, ProductId};
use ordermill_inventory::StockLine;
use ordermill_pricing::LinePrice;

use crate::cart::CartItem;

/// One checkout-ready line: the cart quantity joined with the product's
/// identity and its price as of the moment the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    pub quantity: i64,
}

/// A cart frozen at checkout.
///
/// Products that are unknown to the catalog or no longer sellable are
/// silently dropped rather than failing the whole checkout; the caller sees
/// what was actually purchasable. Later price changes never affect a
/// snapshot that has already been taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    lines: Vec<SnapshotLine>,
}

impl CartSnapshot {
    pub fn take<C: Catalog>(items: &[CartItem], catalog: &C) -> DomainResult<Self> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity < 1 {
                return Err(DomainError::validation("quantity must be at least 1"));
            }
            let Some(product) = catalog.product(item.product_id) else {
                continue;
            };
            if !product.can_be_sold() {
                continue;
            }
            lines.push(SnapshotLine {
                product_id: product.id,
                sku: product.sku,
                name: product.name,
                unit_price: product.retail_price,
                quantity: item.quantity,
            });
        }
        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[SnapshotLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The reservation this snapshot implies, one line per product.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.lines
            .iter()
            .map(|line| StockLine {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect()
    }

    /// The pricing input this snapshot implies.
    pub fn line_prices(&self) -> Vec<LinePrice> {
        self.lines
            .iter()
            .map(|line| LinePrice {
                unit_price: line.unit_price,
                quantity: line.quantity,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ordermill_catalog::Product;

    struct FixedCatalog(Vec<Product>);

    impl Catalog for FixedCatalog {
        fn product(&self, id: ProductId) -> Option<Product> {
            self.0.iter().find(|p| p.id == id).cloned()
        }
    }

    fn product(name: &str, price: Money, active: bool) -> Product {
        let mut product = Product::new(
            ProductId::new(),
            name.to_uppercase(),
            name.to_string(),
            price,
            Money::ZERO,
        )
        .unwrap();
        product.active = active;
        product
    }

    fn item(product_id: ProductId, quantity: i64) -> CartItem {
        CartItem { product_id, quantity, added_at: Utc::now() }
    }

    #[test]
    fn snapshot_freezes_current_catalog_prices() {
        let widget = product("widget", Money::from_dollars(10, 0), true);
        let catalog = FixedCatalog(vec![widget.clone()]);

        let snapshot = CartSnapshot::take(&[item(widget.id, 2)], &catalog).unwrap();

        assert_eq!(snapshot.lines().len(), 1);
        assert_eq!(snapshot.lines()[0].unit_price, Money::from_dollars(10, 0));
        assert_eq!(snapshot.lines()[0].quantity, 2);
        assert_eq!(snapshot.lines()[0].name, "widget");
    }

    #[test]
    fn inactive_and_unknown_products_are_dropped() {
        let active = product("widget", Money::from_dollars(10, 0), true);
        let retired = product("gizmo", Money::from_dollars(3, 0), false);
        let catalog = FixedCatalog(vec![active.clone(), retired.clone()]);

        let snapshot = CartSnapshot::take(
            &[
                item(active.id, 1),
                item(retired.id, 1),
                item(ProductId::new(), 1),
            ],
            &catalog,
        )
        .unwrap();

        assert_eq!(snapshot.lines().len(), 1);
        assert_eq!(snapshot.lines()[0].product_id, active.id);
    }

    #[test]
    fn stock_lines_mirror_snapshot_quantities() {
        let widget = product("widget", Money::from_dollars(10, 0), true);
        let catalog = FixedCatalog(vec![widget.clone()]);
        let snapshot = CartSnapshot::take(&[item(widget.id, 4)], &catalog).unwrap();

        let stock = snapshot.stock_lines();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].product_id, widget.id);
        assert_eq!(stock[0].quantity, 4);
    }
}
