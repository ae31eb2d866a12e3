use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use ordermill_cart::CartItem;
use ordermill_core::{LocationId, Money, OrderId, ProductId, UserId};
use ordermill_inventory::InventoryRecord;
use ordermill_orders::{Address, AddressInput, AddressKind, Order, OrderNumber, OrderStatus};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::{FulfillmentStore, OrderWithItems, StoreError};

/// What a successful order creation returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub total: Money,
}

/// Result of an administrative status change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub order_id: OrderId,
    pub previous: OrderStatus,
    pub current: OrderStatus,
}

/// Result of an administrative inventory adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub delta: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reason: String,
}

/// The fulfillment service.
///
/// Thin by design: validation and orchestration live here, the atomicity
/// lives in the store. Generic over the store so tests run against
/// [`crate::MemoryStore`] and deployments against the Postgres backend.
#[derive(Debug)]
pub struct OrderEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S> OrderEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<S: FulfillmentStore> OrderEngine<S> {
    /// Turn the user's cart into an order.
    ///
    /// Address validation happens up front; everything stateful (snapshot,
    /// reservation, pricing, persistence, cart clearing) is one store call.
    /// Order number collisions are retried with a fresh number, up to the
    /// configured attempt limit.
    #[instrument(skip(self, shipping, billing), fields(user_id = %user_id))]
    pub fn create_order(
        &self,
        user_id: UserId,
        shipping: Option<AddressInput>,
        billing: Option<AddressInput>,
    ) -> Result<OrderReceipt, EngineError> {
        let shipping = shipping
            .map(|input| Address::new(user_id, AddressKind::Shipping, input))
            .transpose()?;
        let billing = billing
            .map(|input| Address::new(user_id, AddressKind::Billing, input))
            .transpose()?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let number = OrderNumber::generate();
            match self.store.place_order(
                user_id,
                number,
                shipping.clone(),
                billing.clone(),
                &self.config.pricing,
            ) {
                Ok(placed) => {
                    info!(
                        order_id = %placed.order.id,
                        order_number = %placed.order.number,
                        total = %placed.order.charges.total,
                        "order created"
                    );
                    return Ok(OrderReceipt {
                        order_id: placed.order.id,
                        order_number: placed.order.number,
                        total: placed.order.charges.total,
                    });
                }
                Err(StoreError::DuplicateOrderNumber(taken))
                    if attempts < self.config.max_order_number_attempts =>
                {
                    warn!(number = %taken, attempts, "order number collision, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub fn get_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<OrderWithItems, EngineError> {
        Ok(self.store.order_with_items(order_id, user_id)?)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_orders(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, EngineError> {
        Ok(self.store.orders_for_user(user_id, status)?)
    }

    /// Cancel the user's pending order, restoring its reserved stock.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, EngineError> {
        let order = self.store.cancel_order(order_id, user_id)?;
        info!(order_number = %order.number, "order cancelled");
        Ok(order)
    }

    /// Administrative status change, validated against the transition table.
    #[instrument(skip(self), fields(order_id = %order_id, next = %next))]
    pub fn set_order_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<StatusChange, EngineError> {
        let (previous, current) = self.store.set_order_status(order_id, next)?;
        info!(%previous, %current, "order status changed");
        Ok(StatusChange {
            order_id,
            previous,
            current,
        })
    }

    /// Administrative stock correction. Zero deltas are rejected so every
    /// adjustment in the log reflects an actual change.
    #[instrument(skip(self, reason), fields(product_id = %product_id, location_id = %location_id, delta))]
    pub fn adjust_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
        reason: impl Into<String>,
    ) -> Result<InventoryAdjustment, EngineError> {
        if delta == 0 {
            return Err(EngineError::Validation(
                "adjustment delta cannot be zero".to_string(),
            ));
        }
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "adjustment reason cannot be empty".to_string(),
            ));
        }
        let (previous_quantity, new_quantity) =
            self.store.adjust_inventory(product_id, location_id, delta)?;
        info!(previous_quantity, new_quantity, %reason, "inventory adjusted");
        Ok(InventoryAdjustment {
            product_id,
            location_id,
            delta,
            previous_quantity,
            new_quantity,
            reason,
        })
    }

    /// Records at or below their minimum stock threshold.
    pub fn low_stock_report(&self) -> Result<Vec<InventoryRecord>, EngineError> {
        Ok(self.store.low_stock()?)
    }

    // Cart operations. Quantity and availability rules are enforced inside
    // the store so they hold under the same lock as the data they check.

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id, quantity))]
    pub fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), EngineError> {
        Ok(self.store.add_cart_item(user_id, product_id, quantity)?)
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id, quantity))]
    pub fn update_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), EngineError> {
        Ok(self.store.update_cart_item(user_id, product_id, quantity)?)
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub fn remove_from_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<(), EngineError> {
        Ok(self.store.remove_cart_item(user_id, product_id)?)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn clear_cart(&self, user_id: UserId) -> Result<(), EngineError> {
        Ok(self.store.clear_cart(user_id)?)
    }

    pub fn cart_items(&self, user_id: UserId) -> Result<Vec<CartItem>, EngineError> {
        Ok(self.store.cart_items(user_id)?)
    }
}
