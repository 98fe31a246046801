//! Postgres repository
//!
//! Order transactions lock each variant row (`FOR UPDATE`) before checking its
//! stock, and the decrement itself is conditional on enough stock remaining, so
//! a lost race surfaces as zero affected rows rather than negative stock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use std::collections::HashMap;
use uuid::Uuid;
use crate::domain::aggregates::{
    Delivery, DeliveryAgent, Order, OrderItem, Product, ShippingInfo, Store, StoreSnapshot, Variant, VariantListing,
};
use crate::domain::value_objects::{Money, PhoneNumber, TrackingNumber, Wilaya};
use crate::repository::{CatalogRepository, DeliveryInsert, DeliveryRepository, OrderRepository, UnitOfWork};
use crate::{MarketplaceError, Result};

const LISTING_SELECT: &str = "SELECT v.id AS variant_id, v.product_id, v.size, v.color, v.stock, \
    p.store_id, p.title, p.price, \
    s.owner_id, s.name AS store_name, s.address AS store_address, s.city AS store_city, s.storage_city, \
    s.click_collect, s.offers_free_delivery, s.free_delivery_threshold \
    FROM variants v JOIN products p ON p.id = v.product_id JOIN stores s ON s.id = p.store_id";

const STORE_SELECT: &str = "SELECT id, owner_id, name, address, city, storage_city, click_collect, \
    offers_free_delivery, free_delivery_threshold FROM stores";

#[derive(Clone, Debug)]
pub struct PgRepository { pool: PgPool }

impl PgRepository {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    async fn load_orders(&self, where_clause: &str, key: Uuid) -> Result<Vec<Order>> {
        let sql = format!("SELECT * FROM orders WHERE {} ORDER BY created_at DESC", where_clause);
        let rows: Vec<OrderRow> = sqlx::query_as(&sql).bind(key).fetch_all(&self.pool).await?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let items: Vec<OrderItemRow> = sqlx::query_as("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY position")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item.into_domain()?);
        }
        rows.into_iter().map(|r| { let items = by_order.remove(&r.id).unwrap_or_default(); r.into_domain(items) }).collect()
    }
}

fn storage_err(context: &str, detail: impl std::fmt::Display) -> MarketplaceError {
    MarketplaceError::Storage(format!("{}: {}", context, detail))
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| storage_err(column, format!("negative value {}", value)))
}

fn to_i32(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| storage_err(column, format!("value {} out of range", value)))
}

fn parse_wilaya(raw: Option<String>) -> Option<Wilaya> { raw.and_then(|w| w.parse().ok()) }

fn store_from_row(row: &PgRow, prefix: &str) -> std::result::Result<Store, sqlx::Error> {
    let col = |name: &str| if prefix.is_empty() { name.to_string() } else { format!("{}{}", prefix, name) };
    Ok(Store {
        id: row.try_get(if prefix.is_empty() { "id" } else { "store_id" })?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get(col("name").as_str())?,
        address: row.try_get(col("address").as_str())?,
        city: row.try_get(col("city").as_str())?,
        storage_city: parse_wilaya(row.try_get("storage_city")?),
        click_collect: row.try_get("click_collect")?,
        offers_free_delivery: row.try_get("offers_free_delivery")?,
        free_delivery_threshold: row.try_get::<Option<Decimal>, _>("free_delivery_threshold")?.map(Money::new),
    })
}

struct StoreRow(Store);

impl<'r> FromRow<'r, PgRow> for StoreRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> { store_from_row(row, "").map(StoreRow) }
}

struct ListingRow(VariantListing);

impl<'r> FromRow<'r, PgRow> for ListingRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let stock: i32 = row.try_get("stock")?;
        let store = store_from_row(row, "store_")?;
        let variant = Variant {
            id: row.try_get("variant_id")?,
            product_id: row.try_get("product_id")?,
            size: row.try_get("size")?,
            color: row.try_get("color")?,
            stock: u32::try_from(stock).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        };
        let product = Product {
            id: variant.product_id,
            store_id: store.id,
            title: row.try_get("title")?,
            price: Money::new(row.try_get("price")?),
        };
        Ok(ListingRow(VariantListing { variant, product, store }))
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    total: Decimal,
    delivery_fee: Decimal,
    payment_method: String,
    delivery_type: String,
    store_id: Option<Uuid>,
    store_name: Option<String>,
    store_address: Option<String>,
    store_city: Option<String>,
    shipping_name: Option<String>,
    shipping_phone: Option<String>,
    shipping_address: Option<String>,
    shipping_city: Option<String>,
    shipping_wilaya: Option<String>,
    delivery_latitude: Option<f64>,
    delivery_longitude: Option<f64>,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self, items: Vec<OrderItem>) -> Result<Order> {
        let store = match (self.store_id, self.store_name) {
            (Some(id), Some(name)) => Some(StoreSnapshot {
                id, name, address: self.store_address.unwrap_or_default(), city: self.store_city.unwrap_or_default(),
            }),
            _ => None,
        };
        let shipping = match (self.shipping_name, self.shipping_phone, self.shipping_wilaya) {
            (Some(name), Some(phone), Some(wilaya)) => Some(ShippingInfo {
                name,
                phone: PhoneNumber::parse(&phone).map_err(|e| storage_err("orders.shipping_phone", e))?,
                address: self.shipping_address.unwrap_or_default(),
                city: self.shipping_city.unwrap_or_default(),
                wilaya: wilaya.parse().map_err(|e| storage_err("orders.shipping_wilaya", e))?,
            }),
            _ => None,
        };
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            status: self.status.parse().map_err(|e| storage_err("orders.status", e))?,
            total: Money::new(self.total),
            delivery_fee: Money::new(self.delivery_fee),
            payment_method: self.payment_method.parse().map_err(|e| storage_err("orders.payment_method", e))?,
            delivery_type: self.delivery_type.parse().map_err(|e| storage_err("orders.delivery_type", e))?,
            store,
            shipping,
            delivery_latitude: self.delivery_latitude,
            delivery_longitude: self.delivery_longitude,
            items,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct OrderItemRow { id: Uuid, order_id: Uuid, variant_id: Uuid, product_id: Uuid, store_id: Uuid, title: String, quantity: i32, price: Decimal }

impl OrderItemRow {
    fn into_domain(self) -> Result<OrderItem> {
        Ok(OrderItem {
            id: self.id, order_id: self.order_id, variant_id: self.variant_id, product_id: self.product_id,
            store_id: self.store_id, title: self.title, quantity: to_u32(self.quantity, "order_items.quantity")?,
            price: Money::new(self.price),
        })
    }
}

#[derive(FromRow)]
struct DeliveryRow {
    id: Uuid, order_id: Uuid, agent_id: Uuid, tracking_number: String, status: String,
    assigned_at: DateTime<Utc>, cod_amount: Decimal, cod_collected: bool,
}

impl DeliveryRow {
    fn into_domain(self) -> Result<Delivery> {
        Ok(Delivery {
            id: self.id, order_id: self.order_id, agent_id: self.agent_id,
            tracking_number: TrackingNumber::from_stored(self.tracking_number),
            status: self.status.parse().map_err(|e| storage_err("deliveries.status", e))?,
            assigned_at: self.assigned_at, cod_amount: Money::new(self.cod_amount), cod_collected: self.cod_collected,
        })
    }
}

#[derive(FromRow)]
struct AgentRow { id: Uuid, user_id: Uuid, is_active: bool }

impl From<AgentRow> for DeliveryAgent {
    fn from(r: AgentRow) -> Self { DeliveryAgent { id: r.id, user_id: r.user_id, is_active: r.is_active } }
}

struct PgUnitOfWork { tx: Transaction<'static, Postgres> }

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_listing(&mut self, variant_id: Uuid) -> Result<Option<VariantListing>> {
        let sql = format!("{} WHERE v.id = $1 FOR UPDATE OF v", LISTING_SELECT);
        let row: Option<ListingRow> = sqlx::query_as(&sql).bind(variant_id).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|r| r.0))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let store = order.store.as_ref();
        let shipping = order.shipping.as_ref();
        sqlx::query(
            "INSERT INTO orders (id, user_id, status, total, delivery_fee, payment_method, delivery_type, \
             store_id, store_name, store_address, store_city, shipping_name, shipping_phone, shipping_address, \
             shipping_city, shipping_wilaya, delivery_latitude, delivery_longitude, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.status.as_str())
        .bind(order.total.amount())
        .bind(order.delivery_fee.amount())
        .bind(order.payment_method.as_str())
        .bind(order.delivery_type.as_str())
        .bind(store.map(|s| s.id))
        .bind(store.map(|s| s.name.clone()))
        .bind(store.map(|s| s.address.clone()))
        .bind(store.map(|s| s.city.clone()))
        .bind(shipping.map(|s| s.name.clone()))
        .bind(shipping.map(|s| s.phone.as_str().to_string()))
        .bind(shipping.map(|s| s.address.clone()))
        .bind(shipping.map(|s| s.city.clone()))
        .bind(shipping.map(|s| s.wilaya.name().to_string()))
        .bind(order.delivery_latitude)
        .bind(order.delivery_longitude)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, variant_id, product_id, store_id, title, quantity, price, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.variant_id)
            .bind(item.product_id)
            .bind(item.store_id)
            .bind(&item.title)
            .bind(to_i32(item.quantity, "order_items.quantity")?)
            .bind(item.price.amount())
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn decrement_stock(&mut self, variant_id: Uuid, quantity: u32) -> Result<bool> {
        let affected = sqlx::query("UPDATE variants SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
            .bind(variant_id)
            .bind(to_i32(quantity, "variants.stock")?)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        Ok(affected == 1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgRepository {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.load_orders("id = $1", order_id).await?.into_iter().next())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.load_orders("user_id = $1", user_id).await
    }

    async fn orders_for_store(&self, store_id: Uuid) -> Result<Vec<Order>> {
        self.load_orders("id IN (SELECT order_id FROM order_items WHERE store_id = $1)", store_id).await
    }
}

#[async_trait]
impl CatalogRepository for PgRepository {
    async fn find_stores(&self, ids: &[Uuid]) -> Result<Vec<Store>> {
        let sql = format!("{} WHERE id = ANY($1)", STORE_SELECT);
        let rows: Vec<StoreRow> = sqlx::query_as(&sql).bind(ids).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn find_listings(&self, variant_ids: &[Uuid]) -> Result<Vec<VariantListing>> {
        let sql = format!("{} WHERE v.id = ANY($1)", LISTING_SELECT);
        let rows: Vec<ListingRow> = sqlx::query_as(&sql).bind(variant_ids).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[async_trait]
impl DeliveryRepository for PgRepository {
    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<DeliveryAgent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT id, user_id, is_active FROM delivery_agents WHERE id = $1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_agent_by_user(&self, user_id: Uuid) -> Result<Option<DeliveryAgent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT id, user_id, is_active FROM delivery_agents WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_delivery(&self, delivery: &Delivery) -> Result<DeliveryInsert> {
        let outcome = sqlx::query(
            "INSERT INTO deliveries (id, order_id, agent_id, tracking_number, status, assigned_at, cod_amount, cod_collected) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(delivery.id)
        .bind(delivery.order_id)
        .bind(delivery.agent_id)
        .bind(delivery.tracking_number.as_str())
        .bind(delivery.status.as_str())
        .bind(delivery.assigned_at)
        .bind(delivery.cod_amount.amount())
        .bind(delivery.cod_collected)
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(DeliveryInsert::Inserted),
            Err(sqlx::Error::Database(db)) => match db.constraint() {
                Some("deliveries_order_id_key") => Ok(DeliveryInsert::DuplicateOrder),
                Some("deliveries_tracking_number_key") => Ok(DeliveryInsert::DuplicateTrackingNumber),
                _ => Err(storage_err("deliveries", db)),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn find_delivery_for_order(&self, order_id: Uuid) -> Result<Option<Delivery>> {
        let row: Option<DeliveryRow> = sqlx::query_as("SELECT * FROM deliveries WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(DeliveryRow::into_domain).transpose()
    }
}
