//! End-to-end tests of the engine against the in-memory store: the full
//! cart -> order -> cancel flow, concurrency behavior, and the error
//! surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ordermill_cart::CartItem;
use ordermill_catalog::Product;
use ordermill_core::{LocationId, Money, OrderId, ProductId, UserId};
use ordermill_inventory::InventoryRecord;
use ordermill_orders::{Address, AddressInput, Order, OrderNumber, OrderStatus};
use ordermill_pricing::PricingPolicy;

use crate::engine::OrderEngine;
use crate::error::EngineError;
use crate::store::{FulfillmentStore, MemoryStore, OrderWithItems, StoreError};

fn engine() -> OrderEngine<MemoryStore> {
    ordermill_observability::init_for_tests();
    OrderEngine::new(MemoryStore::new())
}

fn seed_product(store: &impl FulfillmentStore, name: &str, price: Money) -> ProductId {
    let product = Product::new(
        ProductId::new(),
        name.to_uppercase(),
        name,
        price,
        Money::ZERO,
    )
    .unwrap();
    let id = product.id;
    store.upsert_product(product).unwrap();
    id
}

fn seed_stock(
    store: &impl FulfillmentStore,
    product_id: ProductId,
    quantity: i64,
) -> LocationId {
    let location_id = LocationId::new();
    store
        .upsert_inventory(
            InventoryRecord::new(product_id, location_id, quantity, 0, 10_000).unwrap(),
        )
        .unwrap();
    location_id
}

fn stock_of(store: &impl FulfillmentStore, product_id: ProductId) -> i64 {
    store
        .inventory(product_id)
        .unwrap()
        .iter()
        .map(|r| r.quantity())
        .sum()
}

fn shipping_input() -> AddressInput {
    AddressInput {
        street: "1 Elm St".into(),
        city: "Springfield".into(),
        state: "IL".into(),
        zip_code: "62704".into(),
        country: None,
    }
}

#[test]
fn worked_example_from_cart_to_pending_order() {
    let engine = engine();
    let user = UserId::new();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    let gadget = seed_product(engine.store(), "gadget", Money::from_dollars(5, 0));
    seed_stock(engine.store(), widget, 5);
    seed_stock(engine.store(), gadget, 5);

    engine.add_to_cart(user, widget, 2).unwrap();
    engine.add_to_cart(user, gadget, 1).unwrap();

    let receipt = engine
        .create_order(user, Some(shipping_input()), None)
        .unwrap();
    assert_eq!(receipt.total, Money::from_dollars(36, 99));

    let placed = engine.get_order(receipt.order_id, user).unwrap();
    assert_eq!(placed.order.status(), OrderStatus::Pending);
    assert_eq!(placed.order.charges.subtotal, Money::from_dollars(25, 0));
    assert_eq!(placed.order.charges.tax, Money::from_dollars(2, 0));
    assert_eq!(placed.order.charges.shipping, Money::from_dollars(9, 99));
    assert_eq!(placed.order.charges.total, Money::from_dollars(36, 99));
    assert_eq!(placed.items.len(), 2);
    let shipping = placed.shipping_address.unwrap();
    assert_eq!(shipping.country, "USA");
    assert!(placed.billing_address.is_none());

    assert_eq!(stock_of(engine.store(), widget), 3);
    assert_eq!(stock_of(engine.store(), gadget), 4);
    assert!(engine.cart_items(user).unwrap().is_empty());
}

#[test]
fn cancellation_restores_exactly_the_reserved_stock() {
    let engine = engine();
    let user = UserId::new();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    let gadget = seed_product(engine.store(), "gadget", Money::from_dollars(5, 0));
    seed_stock(engine.store(), widget, 5);
    seed_stock(engine.store(), gadget, 5);

    engine.add_to_cart(user, widget, 2).unwrap();
    engine.add_to_cart(user, gadget, 1).unwrap();
    let receipt = engine.create_order(user, None, None).unwrap();

    let cancelled = engine.cancel_order(receipt.order_id, user).unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(stock_of(engine.store(), widget), 5);
    assert_eq!(stock_of(engine.store(), gadget), 5);

    // Cancelling again must be rejected without touching inventory.
    let err = engine.cancel_order(receipt.order_id, user).unwrap_err();
    match err {
        EngineError::InvalidTransition { current, attempted } => {
            assert_eq!(current, "cancelled");
            assert_eq!(attempted, "cancelled");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(stock_of(engine.store(), widget), 5);
    assert_eq!(stock_of(engine.store(), gadget), 5);
}

#[test]
fn adding_more_than_summed_stock_is_rejected_at_the_cart() {
    let engine = engine();
    let user = UserId::new();
    let gizmo = seed_product(engine.store(), "gizmo", Money::from_dollars(3, 0));
    seed_stock(engine.store(), gizmo, 3);

    let err = engine.add_to_cart(user, gizmo, 10).unwrap_err();
    match err {
        EngineError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, gizmo);
            assert_eq!(requested, 10);
            assert_eq!(available, 3);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert!(engine.cart_items(user).unwrap().is_empty());
}

#[test]
fn failed_placement_leaves_cart_and_stock_untouched() {
    let engine = engine();
    let user = UserId::new();
    let gizmo = seed_product(engine.store(), "gizmo", Money::from_dollars(3, 0));
    let location = seed_stock(engine.store(), gizmo, 3);

    engine.add_to_cart(user, gizmo, 3).unwrap();
    // Stock shrinks after the item went into the cart.
    engine
        .adjust_inventory(gizmo, location, -2, "damaged in receiving")
        .unwrap();

    let err = engine.create_order(user, None, None).unwrap_err();
    match err {
        EngineError::InsufficientStock {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 3);
            assert_eq!(available, 1);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    assert_eq!(stock_of(engine.store(), gizmo), 1);
    assert_eq!(engine.cart_items(user).unwrap().len(), 1);
    assert!(engine.list_orders(user, None).unwrap().is_empty());
}

#[test]
fn order_prices_are_frozen_against_catalog_edits() {
    let engine = engine();
    let user = UserId::new();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    seed_stock(engine.store(), widget, 5);

    engine.add_to_cart(user, widget, 1).unwrap();
    let receipt = engine.create_order(user, None, None).unwrap();

    // Reprice the product after the order exists.
    let mut product = engine.store().product(widget).unwrap().unwrap();
    product.retail_price = Money::from_dollars(99, 0);
    engine.store().upsert_product(product).unwrap();

    let placed = engine.get_order(receipt.order_id, user).unwrap();
    assert_eq!(placed.items[0].unit_price, Money::from_dollars(10, 0));
    assert_eq!(
        placed.order.charges.subtotal,
        Money::from_dollars(10, 0)
    );
}

#[test]
fn concurrent_checkouts_never_oversell_the_last_unit() {
    let store = Arc::new(MemoryStore::new());
    let widget = seed_product(&store, "widget", Money::from_dollars(10, 0));
    seed_stock(&store, widget, 1);

    let shoppers: Vec<UserId> = (0..8).map(|_| UserId::new()).collect();
    for user in &shoppers {
        store.add_cart_item(*user, widget, 1).unwrap();
    }

    let engine = Arc::new(OrderEngine::new(store.clone()));
    let handles: Vec<_> = shoppers
        .into_iter()
        .map(|user| {
            let engine = engine.clone();
            std::thread::spawn(move || engine.create_order(user, None, None))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one shopper may take the last unit");
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result.as_ref().unwrap_err(),
            EngineError::InsufficientStock { .. }
        ));
    }
    assert_eq!(stock_of(&store, widget), 0);
}

#[test]
fn status_changes_follow_the_transition_table() {
    let engine = engine();
    let user = UserId::new();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    seed_stock(engine.store(), widget, 5);
    engine.add_to_cart(user, widget, 1).unwrap();
    let receipt = engine.create_order(user, None, None).unwrap();

    // Skipping a state is rejected.
    let err = engine
        .set_order_status(receipt.order_id, OrderStatus::Shipped)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    for next in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        let change = engine.set_order_status(receipt.order_id, next).unwrap();
        assert_eq!(change.current, next);
    }

    // Delivered is terminal.
    let err = engine
        .set_order_status(receipt.order_id, OrderStatus::Cancelled)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[test]
fn administrative_cancellation_releases_stock_too() {
    let engine = engine();
    let user = UserId::new();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    seed_stock(engine.store(), widget, 5);
    engine.add_to_cart(user, widget, 2).unwrap();
    let receipt = engine.create_order(user, None, None).unwrap();
    assert_eq!(stock_of(engine.store(), widget), 3);

    let change = engine
        .set_order_status(receipt.order_id, OrderStatus::Cancelled)
        .unwrap();
    assert_eq!(change.previous, OrderStatus::Pending);
    assert_eq!(change.current, OrderStatus::Cancelled);
    assert_eq!(stock_of(engine.store(), widget), 5);
}

#[test]
fn orders_are_scoped_to_their_owner() {
    let engine = engine();
    let owner = UserId::new();
    let stranger = UserId::new();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    seed_stock(engine.store(), widget, 5);
    engine.add_to_cart(owner, widget, 1).unwrap();
    let receipt = engine.create_order(owner, None, None).unwrap();

    assert!(matches!(
        engine.get_order(receipt.order_id, stranger).unwrap_err(),
        EngineError::NotFound
    ));
    assert!(matches!(
        engine.cancel_order(receipt.order_id, stranger).unwrap_err(),
        EngineError::NotFound
    ));
    // The pending order survived the stranger's attempts.
    assert_eq!(
        engine.get_order(receipt.order_id, owner).unwrap().order.status(),
        OrderStatus::Pending
    );
}

#[test]
fn empty_and_all_inactive_carts_cannot_become_orders() {
    let engine = engine();
    let user = UserId::new();
    let err = engine.create_order(user, None, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // A cart whose only product got retired prices to nothing.
    let relic = seed_product(engine.store(), "relic", Money::from_dollars(7, 0));
    seed_stock(engine.store(), relic, 5);
    engine.add_to_cart(user, relic, 1).unwrap();
    let mut product = engine.store().product(relic).unwrap().unwrap();
    product.active = false;
    engine.store().upsert_product(product).unwrap();

    let err = engine.create_order(user, None, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(stock_of(engine.store(), relic), 5);
}

#[test]
fn list_orders_filters_by_status_newest_first() {
    let engine = engine();
    let user = UserId::new();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    seed_stock(engine.store(), widget, 10);

    engine.add_to_cart(user, widget, 1).unwrap();
    let first = engine.create_order(user, None, None).unwrap();
    engine.add_to_cart(user, widget, 1).unwrap();
    let second = engine.create_order(user, None, None).unwrap();
    engine.cancel_order(first.order_id, user).unwrap();

    let all = engine.list_orders(user, None).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second.order_id);

    let pending = engine
        .list_orders(user, Some(OrderStatus::Pending))
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.order_id);

    let cancelled = engine
        .list_orders(user, Some(OrderStatus::Cancelled))
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, first.order_id);
}

#[test]
fn inventory_adjustments_report_previous_and_new() {
    let engine = engine();
    let widget = seed_product(engine.store(), "widget", Money::from_dollars(10, 0));
    let location = seed_stock(engine.store(), widget, 5);

    let adjustment = engine
        .adjust_inventory(widget, location, 7, "cycle count")
        .unwrap();
    assert_eq!(adjustment.previous_quantity, 5);
    assert_eq!(adjustment.new_quantity, 12);

    let err = engine
        .adjust_inventory(widget, location, -20, "shrinkage")
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock { .. }));
    assert_eq!(stock_of(engine.store(), widget), 12);

    let err = engine
        .adjust_inventory(widget, location, 0, "noop")
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .adjust_inventory(widget, LocationId::new(), 1, "wrong location")
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound));
}

#[test]
fn low_stock_report_lists_records_at_or_below_minimum() {
    let engine = engine();
    let scarce = ProductId::new();
    let plenty = ProductId::new();
    let location = LocationId::new();
    engine
        .store()
        .upsert_inventory(InventoryRecord::new(scarce, location, 2, 5, 100).unwrap())
        .unwrap();
    engine
        .store()
        .upsert_inventory(InventoryRecord::new(plenty, location, 50, 5, 100).unwrap())
        .unwrap();

    let report = engine.low_stock_report().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].product_id, scarce);
}

/// Store stub that reports order number collisions a configured number of
/// times before delegating to the real in-memory store.
struct CollidingStore {
    inner: MemoryStore,
    remaining_collisions: AtomicU32,
}

impl CollidingStore {
    fn new(collisions: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            remaining_collisions: AtomicU32::new(collisions),
        }
    }
}

impl FulfillmentStore for CollidingStore {
    fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        self.inner.upsert_product(product)
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        self.inner.product(product_id)
    }

    fn upsert_inventory(&self, record: InventoryRecord) -> Result<(), StoreError> {
        self.inner.upsert_inventory(record)
    }

    fn inventory(&self, product_id: ProductId) -> Result<Vec<InventoryRecord>, StoreError> {
        self.inner.inventory(product_id)
    }

    fn adjust_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
    ) -> Result<(i64, i64), StoreError> {
        self.inner.adjust_inventory(product_id, location_id, delta)
    }

    fn low_stock(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        self.inner.low_stock()
    }

    fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        self.inner.add_cart_item(user_id, product_id, quantity)
    }

    fn update_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        self.inner.update_cart_item(user_id, product_id, quantity)
    }

    fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError> {
        self.inner.remove_cart_item(user_id, product_id)
    }

    fn clear_cart(&self, user_id: UserId) -> Result<(), StoreError> {
        self.inner.clear_cart(user_id)
    }

    fn cart_items(&self, user_id: UserId) -> Result<Vec<CartItem>, StoreError> {
        self.inner.cart_items(user_id)
    }

    fn place_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
        policy: &PricingPolicy,
    ) -> Result<OrderWithItems, StoreError> {
        let remaining = self.remaining_collisions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_collisions.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::DuplicateOrderNumber(
                number.as_str().to_string(),
            ));
        }
        self.inner
            .place_order(user_id, number, shipping_address, billing_address, policy)
    }

    fn order_with_items(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<OrderWithItems, StoreError> {
        self.inner.order_with_items(order_id, user_id)
    }

    fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        self.inner.orders_for_user(user_id, status)
    }

    fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, StoreError> {
        self.inner.cancel_order(order_id, user_id)
    }

    fn set_order_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(OrderStatus, OrderStatus), StoreError> {
        self.inner.set_order_status(order_id, next)
    }
}

#[test]
fn order_number_collisions_are_retried() {
    let store = CollidingStore::new(2);
    let user = UserId::new();
    let widget = seed_product(&store, "widget", Money::from_dollars(10, 0));
    seed_stock(&store, widget, 5);
    store.add_cart_item(user, widget, 1).unwrap();

    let engine = OrderEngine::new(store);
    let receipt = engine.create_order(user, None, None).unwrap();
    assert_eq!(
        engine.get_order(receipt.order_id, user).unwrap().order.id,
        receipt.order_id
    );
}

#[test]
fn persistent_collisions_exhaust_the_attempt_budget() {
    let store = CollidingStore::new(u32::MAX);
    let user = UserId::new();
    let widget = seed_product(&store, "widget", Money::from_dollars(10, 0));
    seed_stock(&store, widget, 5);
    store.add_cart_item(user, widget, 1).unwrap();

    let engine = OrderEngine::new(store);
    let err = engine.create_order(user, None, None).unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));
}
