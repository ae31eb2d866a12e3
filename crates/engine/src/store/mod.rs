//! The storage boundary.
//!
//! A [`FulfillmentStore`] holds products, inventory, carts and orders and
//! executes every mutating operation as one atomic unit. Order placement in
//! particular (snapshot cart, reserve stock, price, persist, clear cart) is
//! a single call so a failure anywhere leaves no partial state behind and
//! two concurrent buyers can never both take the last unit.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ordermill_cart::CartItem;
use ordermill_catalog::Product;
use ordermill_core::{DomainError, LocationId, OrderId, ProductId, UserId};
use ordermill_inventory::InventoryRecord;
use ordermill_orders::{Address, Order, OrderLineItem, OrderNumber, OrderStatus};
use ordermill_pricing::PricingPolicy;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Storage operation error.
///
/// `Domain` wraps deterministic rejections raised while checking rules
/// inside the store's atomic unit; the other variants are storage-level
/// conditions the engine reacts to (retrying on number collisions, mapping
/// the rest onto its own error surface).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("cart is empty")]
    EmptyCart,

    #[error("order number '{0}' already exists")]
    DuplicateOrderNumber(String),

    #[error("storage failure in {operation}: {message}")]
    Persistence { operation: String, message: String },
}

impl StoreError {
    pub(crate) fn persistence(operation: &str, message: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// An order joined with its line items and address snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderLineItem>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
}

/// Transactional storage backend for the fulfillment engine.
///
/// Implementations must make every method atomic: all checks and all writes
/// of one call happen under one write lock (or one database transaction),
/// and a returned error means nothing was changed.
pub trait FulfillmentStore: Send + Sync {
    // Catalog and inventory

    fn upsert_product(&self, product: Product) -> Result<(), StoreError>;

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    fn upsert_inventory(&self, record: InventoryRecord) -> Result<(), StoreError>;

    /// All inventory records for one product, across locations.
    fn inventory(&self, product_id: ProductId) -> Result<Vec<InventoryRecord>, StoreError>;

    /// Apply an administrative stock delta, returning `(previous, new)`.
    /// Rejects deltas that would drive the quantity negative.
    fn adjust_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
    ) -> Result<(i64, i64), StoreError>;

    /// Records at or below their minimum stock threshold.
    fn low_stock(&self) -> Result<Vec<InventoryRecord>, StoreError>;

    // Cart

    /// Add to the user's cart, merging with an existing line for the same
    /// product. Checks the product is sellable and that summed availability
    /// covers the cart quantity (advisory; the hard check happens at order
    /// placement).
    fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError>;

    /// Replace a cart line's quantity; zero removes the line.
    fn update_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError>;

    fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError>;

    fn clear_cart(&self, user_id: UserId) -> Result<(), StoreError>;

    fn cart_items(&self, user_id: UserId) -> Result<Vec<CartItem>, StoreError>;

    // Orders

    /// Place an order from the user's cart as one atomic unit: snapshot the
    /// cart, plan and apply the stock reservation, price, persist
    /// addresses, order, items and reserved lots, then clear the cart.
    /// Fails with `DuplicateOrderNumber` when `number` is already taken.
    fn place_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
        policy: &PricingPolicy,
    ) -> Result<OrderWithItems, StoreError>;

    /// Fetch an order with its items, scoped to the owning user. Orders
    /// owned by someone else are reported as not found, never as forbidden.
    fn order_with_items(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<OrderWithItems, StoreError>;

    /// The user's orders, newest first, optionally filtered by status.
    fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError>;

    /// Cancel the user's pending order and release its reserved lots, both
    /// in the same atomic unit.
    fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, StoreError>;

    /// Administrative status change, validated against the transition
    /// table. Moving `pending -> cancelled` releases the reserved lots the
    /// same way `cancel_order` does. Returns `(previous, new)`.
    fn set_order_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(OrderStatus, OrderStatus), StoreError>;
}

impl<S> FulfillmentStore for Arc<S>
where
    S: FulfillmentStore + ?Sized,
{
    fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        (**self).upsert_product(product)
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(product_id)
    }

    fn upsert_inventory(&self, record: InventoryRecord) -> Result<(), StoreError> {
        (**self).upsert_inventory(record)
    }

    fn inventory(&self, product_id: ProductId) -> Result<Vec<InventoryRecord>, StoreError> {
        (**self).inventory(product_id)
    }

    fn adjust_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
    ) -> Result<(i64, i64), StoreError> {
        (**self).adjust_inventory(product_id, location_id, delta)
    }

    fn low_stock(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        (**self).low_stock()
    }

    fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        (**self).add_cart_item(user_id, product_id, quantity)
    }

    fn update_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        (**self).update_cart_item(user_id, product_id, quantity)
    }

    fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError> {
        (**self).remove_cart_item(user_id, product_id)
    }

    fn clear_cart(&self, user_id: UserId) -> Result<(), StoreError> {
        (**self).clear_cart(user_id)
    }

    fn cart_items(&self, user_id: UserId) -> Result<Vec<CartItem>, StoreError> {
        (**self).cart_items(user_id)
    }

    fn place_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
        policy: &PricingPolicy,
    ) -> Result<OrderWithItems, StoreError> {
        (**self).place_order(user_id, number, shipping_address, billing_address, policy)
    }

    fn order_with_items(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<OrderWithItems, StoreError> {
        (**self).order_with_items(order_id, user_id)
    }

    fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        (**self).orders_for_user(user_id, status)
    }

    fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, StoreError> {
        (**self).cancel_order(order_id, user_id)
    }

    fn set_order_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(OrderStatus, OrderStatus), StoreError> {
        (**self).set_order_status(order_id, next)
    }
}
