//! Postgres-backed fulfillment store.
//!
//! Atomicity comes from one transaction per mutating operation, with
//! `SELECT ... FOR UPDATE` on the inventory rows an operation is about to
//! change. Schema provisioning is out of scope; the store expects these
//! tables to exist:
//!
//! - `products(id, sku, name, active, retail_price_cents, cost_cents, created_at)`
//! - `inventory(product_id, location_id, quantity, min_stock_level, max_stock_level, updated_at)`
//!   with primary key `(product_id, location_id)`
//! - `cart_items(user_id, product_id, quantity, added_at)` with primary key
//!   `(user_id, product_id)`
//! - `addresses(id, user_id, kind, street, city, state, zip_code, country, is_default, created_at)`
//! - `orders(id, user_id, order_number, status, subtotal_cents, tax_cents,
//!   shipping_cents, total_cents, shipping_address_id, billing_address_id,
//!   created_at, updated_at)` with a unique constraint on `order_number`
//! - `order_items(order_id, product_id, sku, name, quantity, unit_price_cents, line_total_cents)`
//! - `order_reserved_lots(order_id, product_id, location_id, quantity)`
//!
//! ## Error mapping
//!
//! Unique violations (`23505`) on `orders.order_number` become
//! `StoreError::DuplicateOrderNumber` so the engine can regenerate and
//! retry; every other sqlx error becomes `StoreError::Persistence` tagged
//! with the failing operation.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use ordermill_cart::{CartItem, CartSnapshot};
use ordermill_catalog::{Catalog, Product};
use ordermill_core::{
    AddressId, DomainError, LocationId, Money, OrderId, ProductId, UserId,
};
use ordermill_inventory::{InventoryRecord, ReservedLot, allocate};
use ordermill_orders::{Address, AddressKind, Order, OrderLineItem, OrderNumber, OrderStatus};
use ordermill_pricing::{PriceBreakdown, PricingPolicy};

use super::{FulfillmentStore, OrderWithItems, StoreError};

/// Postgres-backed store. Cloneable; all clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    pub async fn upsert_product_async(&self, product: Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, active, retail_price_cents, cost_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                active = EXCLUDED.active,
                retail_price_cents = EXCLUDED.retail_price_cents,
                cost_cents = EXCLUDED.cost_cents
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.active)
        .bind(product.retail_price.cents())
        .bind(product.cost.cents())
        .bind(product.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn product_async(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            "SELECT id, sku, name, active, retail_price_cents, cost_cents, created_at \
             FROM products WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product", e))?;

        row.map(|row| {
            let product = ProductRow::from_row(&row)
                .map_err(|e| StoreError::persistence("product", e.to_string()))?;
            Ok(product.into())
        })
        .transpose()
    }

    #[instrument(skip(self, record), fields(product_id = %record.product_id, location_id = %record.location_id), err)]
    pub async fn upsert_inventory_async(
        &self,
        record: InventoryRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, location_id, quantity, min_stock_level, max_stock_level, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (product_id, location_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                min_stock_level = EXCLUDED.min_stock_level,
                max_stock_level = EXCLUDED.max_stock_level,
                updated_at = NOW()
            "#,
        )
        .bind(record.product_id.as_uuid())
        .bind(record.location_id.as_uuid())
        .bind(record.quantity())
        .bind(record.min_stock_level)
        .bind(record.max_stock_level)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_inventory", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn inventory_async(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, location_id, quantity, min_stock_level, max_stock_level, updated_at \
             FROM inventory WHERE product_id = $1 ORDER BY location_id",
        )
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inventory", e))?;

        inventory_rows_to_records("inventory", rows)
    }

    #[instrument(skip(self), fields(product_id = %product_id, location_id = %location_id, delta), err)]
    pub async fn adjust_inventory_async(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
    ) -> Result<(i64, i64), StoreError> {
        let mut tx = self.begin("adjust_inventory").await?;

        let row = sqlx::query(
            "SELECT quantity FROM inventory \
             WHERE product_id = $1 AND location_id = $2 FOR UPDATE",
        )
        .bind(product_id.as_uuid())
        .bind(location_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_inventory", e))?
        .ok_or(DomainError::NotFound)?;

        let previous: i64 = row
            .try_get("quantity")
            .map_err(|e| StoreError::persistence("adjust_inventory", e.to_string()))?;
        let new_quantity = previous
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("inventory adjustment overflowed"))?;
        if new_quantity < 0 {
            return Err(DomainError::insufficient_stock(product_id, -delta, previous).into());
        }

        sqlx::query(
            "UPDATE inventory SET quantity = $3, updated_at = NOW() \
             WHERE product_id = $1 AND location_id = $2",
        )
        .bind(product_id.as_uuid())
        .bind(location_id.as_uuid())
        .bind(new_quantity)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_inventory", e))?;

        self.commit(tx, "adjust_inventory").await?;
        Ok((previous, new_quantity))
    }

    #[instrument(skip(self), err)]
    pub async fn low_stock_async(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, location_id, quantity, min_stock_level, max_stock_level, updated_at \
             FROM inventory WHERE quantity <= min_stock_level \
             ORDER BY product_id, location_id",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("low_stock", e))?;

        inventory_rows_to_records("low_stock", rows)
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id, quantity), err)]
    pub async fn add_cart_item_async(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        if quantity < 1 {
            return Err(DomainError::validation("quantity must be at least 1").into());
        }
        let mut tx = self.begin("add_cart_item").await?;

        let product = fetch_product(&mut tx, product_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !product.can_be_sold() {
            return Err(DomainError::validation("product is not available for sale").into());
        }

        let in_cart: i64 = sqlx::query(
            "SELECT COALESCE(SUM(quantity), 0) AS quantity \
             FROM cart_items WHERE user_id = $1 AND product_id = $2",
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("add_cart_item", e))?
        .try_get("quantity")
        .map_err(|e| StoreError::persistence("add_cart_item", e.to_string()))?;

        let wanted = in_cart
            .checked_add(quantity)
            .ok_or_else(|| DomainError::validation("cart quantity overflowed"))?;
        check_availability(&mut tx, product_id, wanted).await?;

        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, product_id, quantity, added_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(quantity)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("add_cart_item", e))?;

        self.commit(tx, "add_cart_item").await
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id, quantity), err)]
    pub async fn update_cart_item_async(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative").into());
        }
        let mut tx = self.begin("update_cart_item").await?;

        if quantity > 0 {
            let product = fetch_product(&mut tx, product_id)
                .await?
                .ok_or(DomainError::NotFound)?;
            if !product.can_be_sold() {
                return Err(DomainError::validation("product is not available for sale").into());
            }
            check_availability(&mut tx, product_id, quantity).await?;
        }

        let result = if quantity == 0 {
            sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
                .bind(user_id.as_uuid())
                .bind(product_id.as_uuid())
                .execute(&mut *tx)
                .await
        } else {
            sqlx::query(
                "UPDATE cart_items SET quantity = $3 WHERE user_id = $1 AND product_id = $2",
            )
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .bind(quantity)
            .execute(&mut *tx)
            .await
        }
        .map_err(|e| map_sqlx_error("update_cart_item", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound.into());
        }
        self.commit(tx, "update_cart_item").await
    }

    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id), err)]
    pub async fn remove_cart_item_async(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
                .bind(user_id.as_uuid())
                .bind(product_id.as_uuid())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("remove_cart_item", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn clear_cart_async(&self, user_id: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_cart", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn cart_items_async(&self, user_id: UserId) -> Result<Vec<CartItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, quantity, added_at FROM cart_items \
             WHERE user_id = $1 ORDER BY added_at",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cart_items", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let product_id: Uuid = row
                .try_get("product_id")
                .map_err(|e| StoreError::persistence("cart_items", e.to_string()))?;
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| StoreError::persistence("cart_items", e.to_string()))?;
            let added_at: DateTime<Utc> = row
                .try_get("added_at")
                .map_err(|e| StoreError::persistence("cart_items", e.to_string()))?;
            items.push(CartItem {
                product_id: ProductId::from_uuid(product_id),
                quantity,
                added_at,
            });
        }
        Ok(items)
    }

    /// The full order placement unit: snapshot, reserve, price, persist,
    /// clear cart, all in one transaction. Row locks on the affected
    /// inventory rows close the check-then-decrement gap.
    #[instrument(skip(self, shipping_address, billing_address, policy), fields(user_id = %user_id, order_number = %number), err)]
    pub async fn place_order_async(
        &self,
        user_id: UserId,
        number: OrderNumber,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
        policy: &PricingPolicy,
    ) -> Result<OrderWithItems, StoreError> {
        let mut tx = self.begin("place_order").await?;

        let cart_items = fetch_cart_items(&mut tx, user_id).await?;
        if cart_items.is_empty() {
            return Err(StoreError::EmptyCart);
        }

        let product_ids: Vec<Uuid> = cart_items.iter().map(|i| *i.product_id.as_uuid()).collect();
        let products = fetch_products(&mut tx, &product_ids).await?;
        let snapshot = CartSnapshot::take(&cart_items, &SliceCatalog(&products))
            .map_err(StoreError::Domain)?;
        if snapshot.is_empty() {
            return Err(StoreError::EmptyCart);
        }

        // Lock the inventory rows for the snapshot's products before
        // planning against them.
        let rows = sqlx::query(
            "SELECT product_id, location_id, quantity, min_stock_level, max_stock_level, updated_at \
             FROM inventory WHERE product_id = ANY($1) \
             ORDER BY product_id, location_id FOR UPDATE",
        )
        .bind(&product_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("place_order", e))?;
        let records = inventory_rows_to_records("place_order", rows)?;

        let lots = allocate(&records, &snapshot.stock_lines()).map_err(StoreError::Domain)?;
        let charges = policy.price(&snapshot.line_prices()).map_err(StoreError::Domain)?;

        for lot in &lots {
            sqlx::query(
                "UPDATE inventory SET quantity = quantity - $3, updated_at = NOW() \
                 WHERE product_id = $1 AND location_id = $2",
            )
            .bind(lot.product_id.as_uuid())
            .bind(lot.location_id.as_uuid())
            .bind(lot.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("place_order", e))?;
        }

        if let Some(address) = &shipping_address {
            insert_address(&mut tx, address).await?;
        }
        if let Some(address) = &billing_address {
            insert_address(&mut tx, address).await?;
        }

        let order = Order::create(
            user_id,
            number,
            charges,
            lots,
            shipping_address.as_ref().map(|a| a.id),
            billing_address.as_ref().map(|a| a.id),
        );
        insert_order(&mut tx, &order).await?;

        let mut items = Vec::with_capacity(snapshot.lines().len());
        for line in snapshot.lines() {
            let item = OrderLineItem::new(
                line.product_id,
                line.sku.clone(),
                line.name.clone(),
                line.unit_price,
                line.quantity,
            )
            .map_err(StoreError::Domain)?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, sku, name, quantity, unit_price_cents, line_total_cents)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(&item.sku)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.unit_price.cents())
            .bind(item.line_total.cents())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("place_order", e))?;
            items.push(item);
        }

        for lot in order.reserved_lots() {
            sqlx::query(
                "INSERT INTO order_reserved_lots (order_id, product_id, location_id, quantity) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order.id.as_uuid())
            .bind(lot.product_id.as_uuid())
            .bind(lot.location_id.as_uuid())
            .bind(lot.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("place_order", e))?;
        }

        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("place_order", e))?;

        self.commit(tx, "place_order").await?;
        Ok(OrderWithItems {
            order,
            items,
            shipping_address,
            billing_address,
        })
    }

    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id), err)]
    pub async fn order_with_items_async(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<OrderWithItems, StoreError> {
        let row = sqlx::query(ORDER_SELECT)
            .bind(order_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("order_with_items", e))?
            .ok_or(DomainError::NotFound)?;
        let order_row = OrderRow::from_row(&row)
            .map_err(|e| StoreError::persistence("order_with_items", e.to_string()))?;
        if order_row.user_id != *user_id.as_uuid() {
            return Err(DomainError::NotFound.into());
        }
        let lots = self.fetch_lots(order_id).await?;
        let order = order_row.into_order(lots)?;

        let item_rows = sqlx::query(
            "SELECT product_id, sku, name, quantity, unit_price_cents, line_total_cents \
             FROM order_items WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order_with_items", e))?;
        let mut items = Vec::with_capacity(item_rows.len());
        for row in item_rows {
            let item = OrderItemRow::from_row(&row)
                .map_err(|e| StoreError::persistence("order_with_items", e.to_string()))?;
            items.push(item.into());
        }

        let shipping_address = match order.shipping_address_id {
            Some(id) => self.fetch_address(id).await?,
            None => None,
        };
        let billing_address = match order.billing_address_id {
            Some(id) => self.fetch_address(id).await?,
            None => None,
        };

        Ok(OrderWithItems {
            order,
            items,
            shipping_address,
            billing_address,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn orders_for_user_async(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, order_number, status, subtotal_cents, tax_cents, \
                    shipping_cents, total_cents, shipping_address_id, billing_address_id, \
                    created_at, updated_at \
             FROM orders \
             WHERE user_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC",
        )
        .bind(user_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders_for_user", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let order_row = OrderRow::from_row(&row)
                .map_err(|e| StoreError::persistence("orders_for_user", e.to_string()))?;
            let lots = self.fetch_lots(OrderId::from_uuid(order_row.id)).await?;
            orders.push(order_row.into_order(lots)?);
        }
        Ok(orders)
    }

    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id), err)]
    pub async fn cancel_order_async(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, StoreError> {
        let mut tx = self.begin("cancel_order").await?;

        let row = sqlx::query(ORDER_SELECT_FOR_UPDATE)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("cancel_order", e))?
            .ok_or(DomainError::NotFound)?;
        let order_row = OrderRow::from_row(&row)
            .map_err(|e| StoreError::persistence("cancel_order", e.to_string()))?;
        if order_row.user_id != *user_id.as_uuid() {
            return Err(DomainError::NotFound.into());
        }

        let lots = fetch_lots_tx(&mut tx, order_id).await?;
        let mut order = order_row.into_order(lots)?;
        let released = order.cancel().map_err(StoreError::Domain)?;

        release_lots_tx(&mut tx, &released).await?;
        update_order_status(&mut tx, order_id, order.status()).await?;

        self.commit(tx, "cancel_order").await?;
        Ok(order)
    }

    #[instrument(skip(self), fields(order_id = %order_id, next = %next), err)]
    pub async fn set_order_status_async(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(OrderStatus, OrderStatus), StoreError> {
        let mut tx = self.begin("set_order_status").await?;

        let row = sqlx::query(ORDER_SELECT_FOR_UPDATE)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_order_status", e))?
            .ok_or(DomainError::NotFound)?;
        let order_row = OrderRow::from_row(&row)
            .map_err(|e| StoreError::persistence("set_order_status", e.to_string()))?;

        let lots = fetch_lots_tx(&mut tx, order_id).await?;
        let mut order = order_row.into_order(lots)?;
        let previous = order.transition_to(next).map_err(StoreError::Domain)?;

        if next == OrderStatus::Cancelled {
            let reserved = order.reserved_lots().to_vec();
            release_lots_tx(&mut tx, &reserved).await?;
        }
        update_order_status(&mut tx, order_id, next).await?;

        self.commit(tx, "set_order_status").await?;
        Ok((previous, next))
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    async fn commit(
        &self,
        tx: Transaction<'_, Postgres>,
        operation: &str,
    ) -> Result<(), StoreError> {
        tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
    }

    async fn fetch_lots(&self, order_id: OrderId) -> Result<Vec<ReservedLot>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, location_id, quantity \
             FROM order_reserved_lots WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_lots", e))?;
        lot_rows_to_lots(rows)
    }

    async fn fetch_address(&self, address_id: AddressId) -> Result<Option<Address>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, kind, street, city, state, zip_code, country, is_default, created_at \
             FROM addresses WHERE id = $1",
        )
        .bind(address_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_address", e))?;
        row.map(|row| {
            let address = AddressRow::from_row(&row)
                .map_err(|e| StoreError::persistence("fetch_address", e.to_string()))?;
            address.into_address()
        })
        .transpose()
    }
}

const ORDER_SELECT: &str = "SELECT id, user_id, order_number, status, subtotal_cents, tax_cents, \
     shipping_cents, total_cents, shipping_address_id, billing_address_id, created_at, updated_at \
     FROM orders WHERE id = $1";

const ORDER_SELECT_FOR_UPDATE: &str =
    "SELECT id, user_id, order_number, status, subtotal_cents, tax_cents, \
     shipping_cents, total_cents, shipping_address_id, billing_address_id, created_at, updated_at \
     FROM orders WHERE id = $1 FOR UPDATE";

struct SliceCatalog<'a>(&'a [Product]);

impl Catalog for SliceCatalog<'_> {
    fn product(&self, id: ProductId) -> Option<Product> {
        self.0.iter().find(|p| p.id == id).cloned()
    }
}

async fn fetch_product(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
) -> Result<Option<Product>, StoreError> {
    let row = sqlx::query(
        "SELECT id, sku, name, active, retail_price_cents, cost_cents, created_at \
         FROM products WHERE id = $1",
    )
    .bind(product_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_product", e))?;
    row.map(|row| {
        let product = ProductRow::from_row(&row)
            .map_err(|e| StoreError::persistence("fetch_product", e.to_string()))?;
        Ok(product.into())
    })
    .transpose()
}

async fn fetch_products(
    tx: &mut Transaction<'_, Postgres>,
    product_ids: &[Uuid],
) -> Result<Vec<Product>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, sku, name, active, retail_price_cents, cost_cents, created_at \
         FROM products WHERE id = ANY($1)",
    )
    .bind(product_ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_products", e))?;
    let mut products = Vec::with_capacity(rows.len());
    for row in rows {
        let product = ProductRow::from_row(&row)
            .map_err(|e| StoreError::persistence("fetch_products", e.to_string()))?;
        products.push(product.into());
    }
    Ok(products)
}

async fn fetch_cart_items(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<Vec<CartItem>, StoreError> {
    let rows = sqlx::query(
        "SELECT product_id, quantity, added_at FROM cart_items \
         WHERE user_id = $1 ORDER BY added_at",
    )
    .bind(user_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_cart_items", e))?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let product_id: Uuid = row
            .try_get("product_id")
            .map_err(|e| StoreError::persistence("fetch_cart_items", e.to_string()))?;
        let quantity: i64 = row
            .try_get("quantity")
            .map_err(|e| StoreError::persistence("fetch_cart_items", e.to_string()))?;
        let added_at: DateTime<Utc> = row
            .try_get("added_at")
            .map_err(|e| StoreError::persistence("fetch_cart_items", e.to_string()))?;
        items.push(CartItem {
            product_id: ProductId::from_uuid(product_id),
            quantity,
            added_at,
        });
    }
    Ok(items)
}

/// Advisory summed-availability check for cart mutations.
async fn check_availability(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
    quantity: i64,
) -> Result<(), StoreError> {
    let on_hand: i64 = sqlx::query(
        "SELECT COALESCE(SUM(quantity), 0) AS on_hand FROM inventory WHERE product_id = $1",
    )
    .bind(product_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_availability", e))?
    .try_get("on_hand")
    .map_err(|e| StoreError::persistence("check_availability", e.to_string()))?;
    if on_hand < quantity {
        return Err(DomainError::insufficient_stock(product_id, quantity, on_hand).into());
    }
    Ok(())
}

async fn insert_address(
    tx: &mut Transaction<'_, Postgres>,
    address: &Address,
) -> Result<(), StoreError> {
    let kind = match address.kind {
        AddressKind::Shipping => "shipping",
        AddressKind::Billing => "billing",
    };
    sqlx::query(
        r#"
        INSERT INTO addresses (id, user_id, kind, street, city, state, zip_code, country, is_default, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(address.id.as_uuid())
    .bind(address.user_id.as_uuid())
    .bind(kind)
    .bind(&address.street)
    .bind(&address.city)
    .bind(&address.state)
    .bind(&address.zip_code)
    .bind(&address.country)
    .bind(address.is_default)
    .bind(address.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_address", e))?;
    Ok(())
}

async fn insert_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, user_id, order_number, status,
            subtotal_cents, tax_cents, shipping_cents, total_cents,
            shipping_address_id, billing_address_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(order.id.as_uuid())
    .bind(order.user_id.as_uuid())
    .bind(order.number.as_str())
    .bind(order.status().as_str())
    .bind(order.charges.subtotal.cents())
    .bind(order.charges.tax.cents())
    .bind(order.charges.shipping.cents())
    .bind(order.charges.total.cents())
    .bind(order.shipping_address_id.map(|id| *id.as_uuid()))
    .bind(order.billing_address_id.map(|id| *id.as_uuid()))
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::DuplicateOrderNumber(order.number.as_str().to_string())
        } else {
            map_sqlx_error("insert_order", e)
        }
    })?;
    Ok(())
}

async fn fetch_lots_tx(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
) -> Result<Vec<ReservedLot>, StoreError> {
    let rows = sqlx::query(
        "SELECT product_id, location_id, quantity \
         FROM order_reserved_lots WHERE order_id = $1",
    )
    .bind(order_id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_lots", e))?;
    lot_rows_to_lots(rows)
}

async fn release_lots_tx(
    tx: &mut Transaction<'_, Postgres>,
    lots: &[ReservedLot],
) -> Result<(), StoreError> {
    for lot in lots {
        let result = sqlx::query(
            "UPDATE inventory SET quantity = quantity + $3, updated_at = NOW() \
             WHERE product_id = $1 AND location_id = $2",
        )
        .bind(lot.product_id.as_uuid())
        .bind(lot.location_id.as_uuid())
        .bind(lot.quantity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("release_lots", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::persistence(
                "release_lots",
                "reserved lot has no inventory row",
            ));
        }
    }
    Ok(())
}

async fn update_order_status(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
    status: OrderStatus,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_order_status", e))?;
    Ok(())
}

fn lot_rows_to_lots(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<ReservedLot>, StoreError> {
    let mut lots = Vec::with_capacity(rows.len());
    for row in rows {
        let product_id: Uuid = row
            .try_get("product_id")
            .map_err(|e| StoreError::persistence("fetch_lots", e.to_string()))?;
        let location_id: Uuid = row
            .try_get("location_id")
            .map_err(|e| StoreError::persistence("fetch_lots", e.to_string()))?;
        let quantity: i64 = row
            .try_get("quantity")
            .map_err(|e| StoreError::persistence("fetch_lots", e.to_string()))?;
        lots.push(ReservedLot {
            product_id: ProductId::from_uuid(product_id),
            location_id: LocationId::from_uuid(location_id),
            quantity,
        });
    }
    Ok(lots)
}

fn inventory_rows_to_records(
    operation: &str,
    rows: Vec<sqlx::postgres::PgRow>,
) -> Result<Vec<InventoryRecord>, StoreError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let record = InventoryRow::from_row(&row)
            .map_err(|e| StoreError::persistence(operation, e.to_string()))?;
        records.push(record.into_record()?);
    }
    Ok(records)
}

/// Map sqlx errors onto the store's error surface.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::persistence(operation, db_err.message().to_string())
        }
        sqlx::Error::PoolClosed => StoreError::persistence(operation, "connection pool closed"),
        other => StoreError::persistence(operation, other.to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// Row types

#[derive(Debug)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    active: bool,
    retail_price_cents: i64,
    cost_cents: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for ProductRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            retail_price_cents: row.try_get("retail_price_cents")?,
            cost_cents: row.try_get("cost_cents")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: ProductId::from_uuid(row.id),
            sku: row.sku,
            name: row.name,
            active: row.active,
            retail_price: Money::from_cents(row.retail_price_cents),
            cost: Money::from_cents(row.cost_cents),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug)]
struct InventoryRow {
    product_id: Uuid,
    location_id: Uuid,
    quantity: i64,
    min_stock_level: i64,
    max_stock_level: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for InventoryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryRow {
            product_id: row.try_get("product_id")?,
            location_id: row.try_get("location_id")?,
            quantity: row.try_get("quantity")?,
            min_stock_level: row.try_get("min_stock_level")?,
            max_stock_level: row.try_get("max_stock_level")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl InventoryRow {
    fn into_record(self) -> Result<InventoryRecord, StoreError> {
        let mut record = InventoryRecord::new(
            ProductId::from_uuid(self.product_id),
            LocationId::from_uuid(self.location_id),
            self.quantity,
            self.min_stock_level,
            self.max_stock_level,
        )
        .map_err(StoreError::Domain)?;
        record.updated_at = self.updated_at;
        Ok(record)
    }
}

#[derive(Debug)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    order_number: String,
    status: String,
    subtotal_cents: i64,
    tax_cents: i64,
    shipping_cents: i64,
    total_cents: i64,
    shipping_address_id: Option<Uuid>,
    billing_address_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OrderRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            order_number: row.try_get("order_number")?,
            status: row.try_get("status")?,
            subtotal_cents: row.try_get("subtotal_cents")?,
            tax_cents: row.try_get("tax_cents")?,
            shipping_cents: row.try_get("shipping_cents")?,
            total_cents: row.try_get("total_cents")?,
            shipping_address_id: row.try_get("shipping_address_id")?,
            billing_address_id: row.try_get("billing_address_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl OrderRow {
    fn into_order(self, lots: Vec<ReservedLot>) -> Result<Order, StoreError> {
        let status = OrderStatus::from_str(&self.status).map_err(StoreError::Domain)?;
        let number = OrderNumber::parse(&self.order_number).map_err(StoreError::Domain)?;
        Ok(Order::rehydrate(
            OrderId::from_uuid(self.id),
            UserId::from_uuid(self.user_id),
            number,
            status,
            PriceBreakdown {
                subtotal: Money::from_cents(self.subtotal_cents),
                tax: Money::from_cents(self.tax_cents),
                shipping: Money::from_cents(self.shipping_cents),
                total: Money::from_cents(self.total_cents),
            },
            lots,
            self.shipping_address_id.map(AddressId::from_uuid),
            self.billing_address_id.map(AddressId::from_uuid),
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(Debug)]
struct OrderItemRow {
    product_id: Uuid,
    sku: String,
    name: String,
    quantity: i64,
    unit_price_cents: i64,
    line_total_cents: i64,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OrderItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderItemRow {
            product_id: row.try_get("product_id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            quantity: row.try_get("quantity")?,
            unit_price_cents: row.try_get("unit_price_cents")?,
            line_total_cents: row.try_get("line_total_cents")?,
        })
    }
}

impl From<OrderItemRow> for OrderLineItem {
    fn from(row: OrderItemRow) -> Self {
        OrderLineItem {
            product_id: ProductId::from_uuid(row.product_id),
            sku: row.sku,
            name: row.name,
            quantity: row.quantity,
            unit_price: Money::from_cents(row.unit_price_cents),
            line_total: Money::from_cents(row.line_total_cents),
        }
    }
}

#[derive(Debug)]
struct AddressRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    street: String,
    city: String,
    state: String,
    zip_code: String,
    country: String,
    is_default: bool,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for AddressRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AddressRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: row.try_get("kind")?,
            street: row.try_get("street")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
            country: row.try_get("country")?,
            is_default: row.try_get("is_default")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl AddressRow {
    fn into_address(self) -> Result<Address, StoreError> {
        let kind = match self.kind.as_str() {
            "shipping" => AddressKind::Shipping,
            "billing" => AddressKind::Billing,
            other => {
                return Err(StoreError::persistence(
                    "fetch_address",
                    format!("unknown address kind '{other}'"),
                ));
            }
        };
        Ok(Address {
            id: AddressId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            kind,
            street: self.street,
            city: self.city,
            state: self.state,
            zip_code: self.zip_code,
            country: self.country,
            is_default: self.is_default,
            created_at: self.created_at,
        })
    }
}

// The FulfillmentStore trait is synchronous; bridge onto the async inherent
// methods through the ambient tokio runtime, the same way callers inside a
// runtime drive other blocking-style traits.

fn runtime_handle(operation: &str) -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::persistence(
            operation,
            "PostgresStore requires a tokio runtime context",
        )
    })
}

impl FulfillmentStore for PostgresStore {
    fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        runtime_handle("upsert_product")?.block_on(self.upsert_product_async(product))
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        runtime_handle("product")?.block_on(self.product_async(product_id))
    }

    fn upsert_inventory(&self, record: InventoryRecord) -> Result<(), StoreError> {
        runtime_handle("upsert_inventory")?.block_on(self.upsert_inventory_async(record))
    }

    fn inventory(&self, product_id: ProductId) -> Result<Vec<InventoryRecord>, StoreError> {
        runtime_handle("inventory")?.block_on(self.inventory_async(product_id))
    }

    fn adjust_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        delta: i64,
    ) -> Result<(i64, i64), StoreError> {
        runtime_handle("adjust_inventory")?
            .block_on(self.adjust_inventory_async(product_id, location_id, delta))
    }

    fn low_stock(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        runtime_handle("low_stock")?.block_on(self.low_stock_async())
    }

    fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        runtime_handle("add_cart_item")?
            .block_on(self.add_cart_item_async(user_id, product_id, quantity))
    }

    fn update_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        runtime_handle("update_cart_item")?
            .block_on(self.update_cart_item_async(user_id, product_id, quantity))
    }

    fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError> {
        runtime_handle("remove_cart_item")?
            .block_on(self.remove_cart_item_async(user_id, product_id))
    }

    fn clear_cart(&self, user_id: UserId) -> Result<(), StoreError> {
        runtime_handle("clear_cart")?.block_on(self.clear_cart_async(user_id))
    }

    fn cart_items(&self, user_id: UserId) -> Result<Vec<CartItem>, StoreError> {
        runtime_handle("cart_items")?.block_on(self.cart_items_async(user_id))
    }

    fn place_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
        policy: &PricingPolicy,
    ) -> Result<OrderWithItems, StoreError> {
        runtime_handle("place_order")?.block_on(self.place_order_async(
            user_id,
            number,
            shipping_address,
            billing_address,
            policy,
        ))
    }

    fn order_with_items(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<OrderWithItems, StoreError> {
        runtime_handle("order_with_items")?
            .block_on(self.order_with_items_async(order_id, user_id))
    }

    fn orders_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        runtime_handle("orders_for_user")?.block_on(self.orders_for_user_async(user_id, status))
    }

    fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, StoreError> {
        runtime_handle("cancel_order")?.block_on(self.cancel_order_async(order_id, user_id))
    }

    fn set_order_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(OrderStatus, OrderStatus), StoreError> {
        runtime_handle("set_order_status")?
            .block_on(self.set_order_status_async(order_id, next))
    }
}
