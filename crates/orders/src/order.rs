use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordermill_core::{AddressId, DomainResult, Money, OrderId, ProductId, UserId};
use ordermill_inventory::ReservedLot;
use ordermill_pricing::PriceBreakdown;

use crate::number::OrderNumber;
use crate::status::OrderStatus;

/// One purchased line, with name and price frozen at order creation so later
/// catalog edits never change what the customer was charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderLineItem {
    pub fn new(
        product_id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        unit_price: Money,
        quantity: i64,
    ) -> DomainResult<Self> {
        Ok(Self {
            product_id,
            sku: sku.into(),
            name: name.into(),
            quantity,
            unit_price,
            line_total: unit_price.checked_mul(quantity)?,
        })
    }
}

/// An order header. Status is the only field that changes after creation;
/// all changes go through [`Order::transition_to`] so the transition table
/// cannot be bypassed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub number: OrderNumber,
    status: OrderStatus,
    pub charges: PriceBreakdown,
    reserved: Vec<ReservedLot>,
    pub shipping_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn create(
        user_id: UserId,
        number: OrderNumber,
        charges: PriceBreakdown,
        reserved: Vec<ReservedLot>,
        shipping_address_id: Option<AddressId>,
        billing_address_id: Option<AddressId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            user_id,
            number,
            status: OrderStatus::Pending,
            charges,
            reserved,
            shipping_address_id,
            billing_address_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reassemble a previously persisted order. Only storage backends
    /// should call this; new orders go through [`Order::create`].
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: OrderId,
        user_id: UserId,
        number: OrderNumber,
        status: OrderStatus,
        charges: PriceBreakdown,
        reserved: Vec<ReservedLot>,
        shipping_address_id: Option<AddressId>,
        billing_address_id: Option<AddressId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            number,
            status,
            charges,
            reserved,
            shipping_address_id,
            billing_address_id,
            created_at,
            updated_at,
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// The per-location reservations this order is holding. Kept for audit
    /// even after cancellation releases them.
    pub fn reserved_lots(&self) -> &[ReservedLot] {
        &self.reserved
    }

    /// Move to `next`, returning the previous status. Rejected transitions
    /// leave the order untouched.
    pub fn transition_to(&mut self, next: OrderStatus) -> DomainResult<OrderStatus> {
        if !self.status.can_transition(next) {
            return Err(ordermill_core::DomainError::invalid_transition(
                self.status.as_str(),
                next.as_str(),
            ));
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(previous)
    }

    /// Cancel a pending order, yielding the lots the caller must release
    /// back to inventory in the same atomic unit.
    pub fn cancel(&mut self) -> DomainResult<Vec<ReservedLot>> {
        self.transition_to(OrderStatus::Cancelled)?;
        Ok(self.reserved.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordermill_core::{DomainError, LocationId};

    fn charges() -> PriceBreakdown {
        PriceBreakdown {
            subtotal: Money::from_dollars(25, 0),
            tax: Money::from_dollars(2, 0),
            shipping: Money::from_dollars(9, 99),
            total: Money::from_dollars(36, 99),
        }
    }

    fn pending_order(reserved: Vec<ReservedLot>) -> Order {
        Order::create(
            UserId::new(),
            OrderNumber::generate(),
            charges(),
            reserved,
            None,
            None,
        )
    }

    #[test]
    fn cancel_returns_the_reserved_lots() {
        let lot = ReservedLot {
            product_id: ProductId::new(),
            location_id: LocationId::new(),
            quantity: 2,
        };
        let mut order = pending_order(vec![lot]);
        let released = order.cancel().unwrap();
        assert_eq!(released, vec![lot]);
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn cancelling_twice_is_an_invalid_transition() {
        let mut order = pending_order(Vec::new());
        order.cancel().unwrap();
        let err = order.cancel().unwrap_err();
        assert_eq!(
            err,
            DomainError::invalid_transition("cancelled", "cancelled")
        );
    }

    #[test]
    fn shipped_orders_cannot_be_cancelled() {
        let mut order = pending_order(Vec::new());
        order.transition_to(OrderStatus::Processing).unwrap();
        order.transition_to(OrderStatus::Shipped).unwrap();
        let err = order.cancel().unwrap_err();
        assert_eq!(err, DomainError::invalid_transition("shipped", "cancelled"));
        assert_eq!(order.status(), OrderStatus::Shipped);
    }

    #[test]
    fn line_total_is_unit_price_times_quantity() {
        let line = OrderLineItem::new(
            ProductId::new(),
            "WID-1",
            "widget",
            Money::from_dollars(10, 0),
            3,
        )
        .unwrap();
        assert_eq!(line.line_total, Money::from_dollars(30, 0));
    }
}
