use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordermill_core::{DomainError, DomainResult, ProductId, UserId};

/// One product reference in a cart. Deliberately price-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub added_at: DateTime<Utc>,
}

/// A user's cart. At most one item per product; adding the same product
/// again merges into the existing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, items: Vec::new() }
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add_item(&mut self, product_id: ProductId, quantity: i64) -> DomainResult<()> {
        if quantity < 1 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            existing.quantity = existing
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| DomainError::validation("cart quantity overflowed"))?;
        } else {
            self.items.push(CartItem {
                product_id,
                quantity,
                added_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Replace the quantity of an existing line. Setting it to zero removes
    /// the line entirely.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: i64) -> DomainResult<()> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        let position = self
            .items
            .iter()
            .position(|i| i.product_id == product_id)
            .ok_or(DomainError::NotFound)?;
        if quantity == 0 {
            self.items.remove(position);
        } else {
            self.items[position].quantity = quantity;
        }
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: ProductId) -> DomainResult<()> {
        let position = self
            .items
            .iter()
            .position(|i| i.product_id == product_id)
            .ok_or(DomainError::NotFound)?;
        self.items.remove(position);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_the_same_product_merges_quantities() {
        let product = ProductId::new();
        let mut cart = Cart::new(UserId::new());
        cart.add_item(product, 2).unwrap();
        cart.add_item(product, 3).unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 5);
    }

    #[test]
    fn set_quantity_to_zero_removes_the_line() {
        let product = ProductId::new();
        let mut cart = Cart::new(UserId::new());
        cart.add_item(product, 2).unwrap();
        cart.set_quantity(product, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn updating_a_missing_line_is_not_found() {
        let mut cart = Cart::new(UserId::new());
        let err = cart.set_quantity(ProductId::new(), 1).unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[test]
    fn zero_quantity_add_is_rejected() {
        let mut cart = Cart::new(UserId::new());
        let err = cart.add_item(ProductId::new(), 0).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
