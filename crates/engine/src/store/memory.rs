use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use ordermill_cart::{Cart, CartItem, CartSnapshot};
use ordermill_catalog::{Catalog, Product};
use ordermill_core::{DomainError, LocationId, OrderId, ProductId, UserId};
use ordermill_inventory::{InventoryRecord, allocate, available};
use ordermill_orders::{Address, Order, OrderLineItem, OrderNumber, OrderStatus};
use ordermill_pricing::PricingPolicy;

use super::{FulfillmentStore, OrderWithItems, StoreError};

#[derive(Debug, Default)]
struct Inner {
    products: HashMap<ProductId, Product>,
    inventory: HashMap<(ProductId, LocationId), InventoryRecord>,
    carts: HashMap<UserId, Cart>,
    orders: HashMap<OrderId, Order>,
    order_items: HashMap<OrderId, Vec<OrderLineItem>>,
    addresses: HashMap<ordermill_core::AddressId, Address>,
    order_numbers: HashSet<String>,
}

/// In-memory store.
///
/// Intended for tests and development; all mutating operations take the one
/// write lock, which is what makes check-then-decrement atomic here.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

struct MapCatalog<'a>(&'a HashMap<ProductId, Product>);

impl Catalog for MapCatalog<'_> {
    fn product(&self, id: ProductId) -> Option<Product> {
        self.0.get(&id).cloned()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::persistence("lock", "poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::persistence("lock", "poisoned"))
    }
}

impl Inner {
    fn records_for(&self, product_id: ProductId) -> Vec<InventoryRecord> {
        self.inventory
            .values()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect()
    }

    /// Check that summed availability covers `quantity`. Advisory only;
    /// the binding check happens inside `place_order`.
    fn check_availability(&self, product_id: ProductId, quantity: i64) -> Result<(), StoreError> {
        let on_hand = available(&self.records_for(product_id), product_id);
        if on_hand < quantity {
            return Err(DomainError::insufficient_stock(product_id, quantity, on_hand).into());
        }
        Ok(())
    }

    fn sellable_product(&self, product_id: ProductId) -> Result<&Product, StoreError> {
        let product = self
            .products
            .get(&product_id)
            .ok_or(DomainError::NotFound)?;
        if !product.can_be_sold() {
            return Err(DomainError::validation("product is not available for sale").into());
        }
        Ok(product)
    }

    /// Increment the reserved per-location quantities back. Only called for
    /// lots this store decremented earlier, so each record must exist.
    fn release_lots(&mut self, order: &Order) -> Result<(), StoreError> {
        let mut restored = Vec::with_capacity(order.reserved_lots().len());
        for lot in order.reserved_lots() {
            let key = (lot.product_id, lot.location_id);
            let mut record = self
                .inventory
                .get(&key)
                .cloned()
                .ok_or_else(|| StoreError::persistence("release", "reserved lot has no record"))?;
            record.apply_delta(lot.quantity).map_err(StoreError::Domain)?;
            restored.push((key, record));
        }
        for (key, record) in restored {
            self.inventory.insert(key, record);
        }
        Ok(())
    }
}

impl FulfillmentStore for MemoryStore {
    fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.products.insert(product.id, product);
        Ok(())
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&product_id).cloned())
    }

    fn upsert_inventory(&self, record: InventoryRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner
            .inventory
            .insert((record.product_id, record.location_id), record);
        Ok(())
    }

    fn inventory(&self, product_id: ProductId) -> Result<Vec<InventoryRecord>, StoreError> {
        let mut records = self.read()?.records_for(product_id);
        records.sort_by_key(|r| r.location_id);
        Ok(records)
    }

    fn adjust_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
    ) -> Result<(i64, i64), StoreError> {
        let mut inner = self.write()?;
        let record = inner
            .inventory
            .get_mut(&(product_id, location_id))
            .ok_or(DomainError::NotFound)?;
        Ok(record.apply_delta(delta).map_err(StoreError::Domain)?)
    }

    fn low_stock(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let inner = self.read()?;
        let mut records: Vec<InventoryRecord> = inner
            .inventory
            .values()
            .filter(|r| r.is_low_stock())
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.product_id, r.location_id));
        Ok(records)
    }

    fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.sellable_product(product_id)?;
        let in_cart = inner
            .carts
            .get(&user_id)
            .and_then(|cart| cart.items().iter().find(|i| i.product_id == product_id))
            .map(|i| i.quantity)
            .unwrap_or(0);
        let wanted = in_cart
            .checked_add(quantity)
            .ok_or_else(|| DomainError::validation("cart quantity overflowed"))?;
        inner.check_availability(product_id, wanted)?;
        inner
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart::new(user_id))
            .add_item(product_id, quantity)
            .map_err(StoreError::Domain)
    }

    fn update_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if quantity > 0 {
            inner.sellable_product(product_id)?;
            inner.check_availability(product_id, quantity)?;
        }
        let cart = inner.carts.get_mut(&user_id).ok_or(DomainError::NotFound)?;
        cart.set_quantity(product_id, quantity).map_err(StoreError::Domain)
    }

    fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let cart = inner.carts.get_mut(&user_id).ok_or(DomainError::NotFound)?;
        cart.remove_item(product_id).map_err(StoreError::Domain)
    }

    fn clear_cart(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if let Some(cart) = inner.carts.get_mut(&user_id) {
            cart.clear();
        }
        Ok(())
    }

    fn cart_items(&self, user_id: UserId) -> Result<Vec<CartItem>, StoreError> {
        Ok(self
            .read()?
            .carts
            .get(&user_id)
            .map(|cart| cart.items().to_vec())
            .unwrap_or_default())
    }

    fn place_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
        policy: &PricingPolicy,
    ) -> Result<OrderWithItems, StoreError> {
        let mut inner = self.write()?;

        // Every fallible step runs before the first write, so a rejection
        // leaves the store exactly as it was.
        let cart = inner.carts.get(&user_id).ok_or(StoreError::EmptyCart)?;
        if cart.is_empty() {
            return Err(StoreError::EmptyCart);
        }
        let snapshot = CartSnapshot::take(cart.items(), &MapCatalog(&inner.products))
            .map_err(StoreError::Domain)?;
        if snapshot.is_empty() {
            return Err(StoreError::EmptyCart);
        }

        if inner.order_numbers.contains(number.as_str()) {
            return Err(StoreError::DuplicateOrderNumber(number.as_str().to_string()));
        }

        let records: Vec<InventoryRecord> = inner.inventory.values().cloned().collect();
        let lots = allocate(&records, &snapshot.stock_lines()).map_err(StoreError::Domain)?;
        let charges = policy.price(&snapshot.line_prices()).map_err(StoreError::Domain)?;

        let mut decremented = Vec::with_capacity(lots.len());
        for lot in &lots {
            let key = (lot.product_id, lot.location_id);
            let mut record = clone_record(&inner, key)?;
            record.apply_delta(-lot.quantity).map_err(StoreError::Domain)?;
            decremented.push((key, record));
        }

        let mut items = Vec::with_capacity(snapshot.lines().len());
        for line in snapshot.lines() {
            items.push(
                OrderLineItem::new(
                    line.product_id,
                    line.sku.clone(),
                    line.name.clone(),
                    line.unit_price,
                    line.quantity,
                )
                .map_err(StoreError::Domain)?,
            );
        }

        // Point of no return: apply everything.
        for (key, record) in decremented {
            inner.inventory.insert(key, record);
        }
        let order = Order::create(
            user_id,
            number,
            charges,
            lots,
            shipping_address.as_ref().map(|a| a.id),
            billing_address.as_ref().map(|a| a.id),
        );
        if let Some(address) = &shipping_address {
            inner.addresses.insert(address.id, address.clone());
        }
        if let Some(address) = &billing_address {
            inner.addresses.insert(address.id, address.clone());
        }
        inner.order_numbers.insert(order.number.as_str().to_string());
        inner.order_items.insert(order.id, items.clone());
        inner.orders.insert(order.id, order.clone());
        if let Some(cart) = inner.carts.get_mut(&user_id) {
            cart.clear();
        }

        Ok(OrderWithItems {
            order,
            items,
            shipping_address,
            billing_address,
        })
    }

    fn order_with_items(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<OrderWithItems, StoreError> {
        let inner = self.read()?;
        let order = inner
            .orders
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned()
            .ok_or(DomainError::NotFound)?;
        let items = inner.order_items.get(&order_id).cloned().unwrap_or_default();
        let shipping_address = order
            .shipping_address_id
            .and_then(|id| inner.addresses.get(&id).cloned());
        let billing_address = order
            .billing_address_id
            .and_then(|id| inner.addresses.get(&id).cloned());
        Ok(OrderWithItems {
            order,
            items,
            shipping_address,
            billing_address,
        })
    }

    fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        let inner = self.read()?;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .filter(|o| status.is_none_or(|s| o.status() == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, StoreError> {
        let mut inner = self.write()?;
        let mut order = inner
            .orders
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned()
            .ok_or(DomainError::NotFound)?;
        order.cancel().map_err(StoreError::Domain)?;
        inner.release_lots(&order)?;
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    fn set_order_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(OrderStatus, OrderStatus), StoreError> {
        let mut inner = self.write()?;
        let mut order = inner
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(DomainError::NotFound)?;
        let previous = order.transition_to(next).map_err(StoreError::Domain)?;
        if next == OrderStatus::Cancelled {
            inner.release_lots(&order)?;
        }
        inner.orders.insert(order.id, order);
        Ok((previous, next))
    }
}

fn clone_record(
    inner: &Inner,
    key: (ProductId, LocationId),
) -> Result<InventoryRecord, StoreError> {
    inner
        .inventory
        .get(&key)
        .cloned()
        .ok_or_else(|| StoreError::persistence("reserve", "planned lot has no record"))
}
