//! Postgres-backed store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{CartStore, CatalogStore, CouponStore, OrderStore, Result, StoreError};
use crate::domain::aggregates::{
    Additional, CartLine, Category, Coupon, CustomerSnapshot, DiscountKind, Order, OrderDetails, OrderLine,
    OrderStatus, Pricing, Product, ProductSnapshot, StockLevel, Variation,
};
use crate::domain::identity::{Identity, SessionToken, UserId};
use crate::domain::value_objects::{CouponCode, Customization, Money, Quantity};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Conflict { operation },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::corrupt(operation, e),
        other => StoreError::unavailable(operation, other),
    }
}

fn to_i32(operation: &'static str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|e| StoreError::corrupt(operation, e))
}

fn to_quantity(operation: &'static str, value: i32) -> Result<Quantity> {
    u32::try_from(value).ok().and_then(Quantity::new).ok_or_else(|| StoreError::corrupt(operation, format!("quantity {value}")))
}

fn to_count(operation: &'static str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|e| StoreError::corrupt(operation, e))
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    product_id: Uuid,
    product_name: String,
    product_price: Decimal,
    product_image: Option<String>,
    quantity: i32,
    customization: Json<Customization>,
}

impl CartItemRow {
    fn into_line(self) -> Result<CartLine> {
        Ok(CartLine {
            product_id: self.product_id,
            snapshot: ProductSnapshot { name: self.product_name, unit_price: Money::new(self.product_price), image_url: self.product_image },
            quantity: to_quantity("cart.load", self.quantity)?,
            customization: self.customization.0,
        })
    }
}

/// Rows owned by `owner`, folded on (product, customization key): the
/// earliest row keeps its snapshot and position, quantities are summed.
/// A transfer can leave two rows for the same line under one user.
fn merged_cart_sql(owner: &str) -> String {
    format!(
        "SELECT product_id, product_name, product_price, product_image, quantity, customization FROM ( \
            SELECT DISTINCT ON (product_id, customization_key) seq, product_id, product_name, product_price, product_image, customization, \
                LEAST(SUM(quantity) OVER (PARTITION BY product_id, customization_key), 2147483647)::INTEGER AS quantity \
            FROM cart_items WHERE {owner} \
            ORDER BY product_id, customization_key, seq \
        ) merged ORDER BY seq"
    )
}

#[async_trait]
impl CartStore for PgStore {
    async fn load(&self, identity: &Identity) -> Result<Vec<CartLine>> {
        let rows = match identity {
            Identity::Anonymous(session) => sqlx::query_as::<_, CartItemRow>(&merged_cart_sql("session_id = $1 AND user_id IS NULL"))
                .bind(session.as_str()).fetch_all(&self.pool).await,
            Identity::Authenticated(user) => sqlx::query_as::<_, CartItemRow>(&merged_cart_sql("user_id = $1"))
                .bind(user.as_uuid()).fetch_all(&self.pool).await,
        }.map_err(db_error("cart.load"))?;
        rows.into_iter().map(CartItemRow::into_line).collect()
    }

    async fn replace_all(&self, identity: &Identity, lines: &[CartLine]) -> Result<()> {
        let err = db_error("cart.replace_all");
        let mut tx = self.pool.begin().await.map_err(&err)?;
        let (session, user) = match identity {
            Identity::Anonymous(session) => {
                sqlx::query("DELETE FROM cart_items WHERE session_id = $1 AND user_id IS NULL").bind(session.as_str()).execute(&mut *tx).await.map_err(&err)?;
                (Some(session.as_str()), None)
            }
            Identity::Authenticated(user) => {
                sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user.as_uuid()).execute(&mut *tx).await.map_err(&err)?;
                (None, Some(user.as_uuid()))
            }
        };
        for line in lines {
            sqlx::query("INSERT INTO cart_items (id, session_id, user_id, product_id, product_name, product_price, product_image, quantity, customization, customization_key, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())")
                .bind(Uuid::new_v4()).bind(session).bind(user).bind(line.product_id).bind(&line.snapshot.name)
                .bind(line.snapshot.unit_price.amount()).bind(&line.snapshot.image_url)
                .bind(to_i32("cart.replace_all", line.quantity.value())?)
                .bind(Json(&line.customization)).bind(line.customization.key())
                .execute(&mut *tx).await.map_err(&err)?;
        }
        tx.commit().await.map_err(&err)
    }

    async fn clear(&self, identity: &Identity) -> Result<()> {
        match identity {
            Identity::Anonymous(session) => sqlx::query("DELETE FROM cart_items WHERE session_id = $1 AND user_id IS NULL").bind(session.as_str()).execute(&self.pool).await,
            Identity::Authenticated(user) => sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user.as_uuid()).execute(&self.pool).await,
        }.map_err(db_error("cart.clear"))?;
        Ok(())
    }

    async fn transfer(&self, session: &SessionToken, user: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE cart_items SET user_id = $2 WHERE session_id = $1 AND user_id IS NULL")
            .bind(session.as_str()).bind(user.as_uuid())
            .execute(&self.pool).await.map_err(db_error("cart.transfer"))?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    customer_id: Option<Uuid>,
    customer_name: String,
    customer_phone: String,
    customer_email: Option<String>,
    delivery_address: String,
    status: String,
    payment_method: String,
    notes: Option<String>,
    coupon_code: Option<String>,
    subtotal: Decimal,
    delivery_fee: Decimal,
    discount: Decimal,
    total: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, operation: &'static str) -> Result<Order> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            customer_id: self.customer_id.map(UserId::new),
            customer: CustomerSnapshot { name: self.customer_name, phone: self.customer_phone, email: self.customer_email },
            delivery_address: self.delivery_address,
            status: self.status.parse().map_err(|e| StoreError::corrupt(operation, e))?,
            payment_method: self.payment_method.parse().map_err(|e| StoreError::corrupt(operation, e))?,
            notes: self.notes,
            coupon_code: self.coupon_code.map(CouponCode::new).transpose().map_err(|e| StoreError::corrupt(operation, e))?,
            pricing: Pricing {
                subtotal: Money::new(self.subtotal),
                delivery_fee: Money::new(self.delivery_fee),
                discount: Money::new(self.discount),
                total: Money::new(self.total),
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    unit_price: Decimal,
    customization: Json<Customization>,
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order_with_lines(&self, order: &Order, lines: &[OrderLine]) -> Result<()> {
        let err = db_error("orders.insert");
        let mut tx = self.pool.begin().await.map_err(&err)?;
        sqlx::query("INSERT INTO orders (id, order_number, customer_id, customer_name, customer_phone, customer_email, delivery_address, status, payment_method, notes, coupon_code, subtotal, delivery_fee, discount, total, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)")
            .bind(order.id).bind(&order.order_number).bind(order.customer_id.map(|u| u.as_uuid()))
            .bind(&order.customer.name).bind(&order.customer.phone).bind(&order.customer.email)
            .bind(&order.delivery_address).bind(order.status().as_str()).bind(order.payment_method.as_str())
            .bind(&order.notes).bind(order.coupon_code.as_ref().map(CouponCode::as_str))
            .bind(order.pricing.subtotal.amount()).bind(order.pricing.delivery_fee.amount())
            .bind(order.pricing.discount.amount()).bind(order.pricing.total.amount())
            .bind(order.created_at).bind(order.updated_at)
            .execute(&mut *tx).await.map_err(&err)?;

        let line_err = db_error("orders.insert_lines");
        for line in lines {
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, product_name, quantity, unit_price, customization) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(line.id).bind(line.order_id).bind(line.product_id).bind(&line.product_name)
                .bind(to_i32("orders.insert_lines", line.quantity.value())?)
                .bind(line.unit_price.amount()).bind(Json(&line.customization))
                .execute(&mut *tx).await.map_err(&line_err)?;
        }
        tx.commit().await.map_err(&err)
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1").bind(order_id).execute(&self.pool).await.map_err(db_error("orders.delete"))?;
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<OrderDetails>> {
        let err = db_error("orders.get");
        let Some(row) = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(&self.pool).await.map_err(&err)? else {
            return Ok(None);
        };
        let items = sqlx::query_as::<_, OrderItemRow>("SELECT id, order_id, product_id, product_name, quantity, unit_price, customization FROM order_items WHERE order_id = $1 ORDER BY product_name")
            .bind(order_id).fetch_all(&self.pool).await.map_err(&err)?;
        let lines = items.into_iter().map(|item| -> Result<OrderLine> { Ok(OrderLine {
            id: item.id,
            order_id: item.order_id,
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: to_quantity("orders.get", item.quantity)?,
            unit_price: Money::new(item.unit_price),
            customization: item.customization.0,
        }) }).collect::<Result<Vec<_>>>()?;
        Ok(Some(OrderDetails { order: row.into_order("orders.get")?, lines }))
    }

    async fn list(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at DESC")
            .bind(status.map(OrderStatus::as_str))
            .fetch_all(&self.pool).await.map_err(db_error("orders.list"))?;
        rows.into_iter().map(|row| row.into_order("orders.list")).collect()
    }

    async fn update_status(&self, order_id: Uuid, expected: OrderStatus, next: OrderStatus, at: DateTime<Utc>) -> Result<()> {
        let err = db_error("orders.update_status");
        let result = sqlx::query("UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2")
            .bind(order_id).bind(expected.as_str()).bind(next.as_str()).bind(at)
            .execute(&self.pool).await.map_err(&err)?;
        if result.rows_affected() == 1 { return Ok(()); }
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE id = $1").bind(order_id).fetch_optional(&self.pool).await.map_err(&err)?;
        match exists {
            Some(_) => Err(StoreError::Conflict { operation: "orders.update_status" }),
            None => Err(StoreError::NotFound { operation: "orders.update_status" }),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    description: String,
    kind: String,
    value: Decimal,
    minimum_order: Decimal,
    max_uses: Option<i32>,
    uses: i32,
    valid_from: Option<NaiveDate>,
    valid_until: Option<NaiveDate>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl CouponRow {
    fn into_coupon(self, operation: &'static str) -> Result<Coupon> {
        let kind = match self.kind.as_str() {
            "percentage" => DiscountKind::Percentage,
            "fixed" => DiscountKind::Fixed,
            other => return Err(StoreError::corrupt(operation, format!("discount kind {other}"))),
        };
        Ok(Coupon {
            id: self.id,
            code: CouponCode::new(self.code).map_err(|e| StoreError::corrupt(operation, e))?,
            description: self.description,
            kind,
            value: self.value,
            minimum_order: Money::new(self.minimum_order),
            max_uses: self.max_uses.map(|m| to_count(operation, m)).transpose()?,
            uses: to_count(operation, self.uses)?,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            active: self.active,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl CouponStore for PgStore {
    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(code.as_str()).fetch_optional(&self.pool).await.map_err(db_error("coupons.find"))?;
        row.map(|r| r.into_coupon("coupons.find")).transpose()
    }

    async fn find_by_id(&self, coupon_id: Uuid) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE id = $1")
            .bind(coupon_id).fetch_optional(&self.pool).await.map_err(db_error("coupons.find"))?;
        row.map(|r| r.into_coupon("coupons.find")).transpose()
    }

    async fn record_use(&self, coupon_id: Uuid) -> Result<()> {
        let err = db_error("coupons.record_use");
        let result = sqlx::query("UPDATE coupons SET uses = uses + 1 WHERE id = $1 AND (max_uses IS NULL OR uses < max_uses)")
            .bind(coupon_id).execute(&self.pool).await.map_err(&err)?;
        if result.rows_affected() == 1 { return Ok(()); }
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM coupons WHERE id = $1").bind(coupon_id).fetch_optional(&self.pool).await.map_err(&err)?;
        match exists {
            Some(_) => Err(StoreError::Conflict { operation: "coupons.record_use" }),
            None => Err(StoreError::NotFound { operation: "coupons.record_use" }),
        }
    }

    async fn release_use(&self, coupon_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE coupons SET uses = GREATEST(uses - 1, 0) WHERE id = $1")
            .bind(coupon_id).execute(&self.pool).await.map_err(db_error("coupons.release_use"))?;
        if result.rows_affected() == 0 { return Err(StoreError::NotFound { operation: "coupons.release_use" }); }
        Ok(())
    }

    async fn insert(&self, coupon: &Coupon) -> Result<()> {
        let max_uses = coupon.max_uses.map(|m| to_i32("coupons.insert", m)).transpose()?;
        sqlx::query("INSERT INTO coupons (id, code, description, kind, value, minimum_order, max_uses, uses, valid_from, valid_until, active, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)")
            .bind(coupon.id).bind(coupon.code.as_str()).bind(&coupon.description).bind(coupon.kind.as_str())
            .bind(coupon.value).bind(coupon.minimum_order.amount()).bind(max_uses)
            .bind(to_i32("coupons.insert", coupon.uses)?).bind(coupon.valid_from).bind(coupon.valid_until)
            .bind(coupon.active).bind(coupon.created_at)
            .execute(&self.pool).await.map_err(db_error("coupons.insert"))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Coupon>> {
        let rows = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons ORDER BY created_at DESC")
            .fetch_all(&self.pool).await.map_err(db_error("coupons.list"))?;
        rows.into_iter().map(|r| r.into_coupon("coupons.list")).collect()
    }

    async fn set_active(&self, coupon_id: Uuid, active: bool) -> Result<Coupon> {
        let row = sqlx::query_as::<_, CouponRow>("UPDATE coupons SET active = $2 WHERE id = $1 RETURNING *")
            .bind(coupon_id).bind(active).fetch_optional(&self.pool).await.map_err(db_error("coupons.set_active"))?;
        row.ok_or(StoreError::NotFound { operation: "coupons.set_active" })?.into_coupon("coupons.set_active")
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    category_id: Option<Uuid>,
    name: String,
    description: Option<String>,
    base_price: Decimal,
    image_url: Option<String>,
    active: bool,
    variations: Json<Vec<Variation>>,
    additionals: Json<Vec<Additional>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            category_id: row.category_id,
            name: row.name,
            description: row.description,
            base_price: Money::new(row.base_price),
            image_url: row.image_url,
            active: row.active,
            variations: row.variations.0,
            additionals: row.additionals.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StockRow {
    product_id: Uuid,
    quantity: i32,
    low_alert: i32,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        let rows: Vec<(Uuid, String, DateTime<Utc>)> = sqlx::query_as("SELECT id, name, created_at FROM categories ORDER BY name")
            .fetch_all(&self.pool).await.map_err(db_error("catalog.categories"))?;
        Ok(rows.into_iter().map(|(id, name, created_at)| Category { id, name, created_at }).collect())
    }

    async fn insert_category(&self, category: &Category) -> Result<()> {
        sqlx::query("INSERT INTO categories (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(category.id).bind(&category.name).bind(category.created_at)
            .execute(&self.pool).await.map_err(db_error("catalog.insert_category"))?;
        Ok(())
    }

    async fn products(&self, category: Option<Uuid>, include_inactive: bool) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE ($1::UUID IS NULL OR category_id = $1) AND ($2 OR active) ORDER BY name")
            .bind(category).bind(include_inactive)
            .fetch_all(&self.pool).await.map_err(db_error("catalog.products"))?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn product(&self, product_id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(product_id).fetch_optional(&self.pool).await.map_err(db_error("catalog.product"))?;
        Ok(row.map(Product::from))
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        sqlx::query("INSERT INTO products (id, category_id, name, description, base_price, image_url, active, variations, additionals, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     ON CONFLICT (id) DO UPDATE SET category_id = $2, name = $3, description = $4, base_price = $5, image_url = $6, active = $7, variations = $8, additionals = $9, updated_at = $11")
            .bind(product.id).bind(product.category_id).bind(&product.name).bind(&product.description)
            .bind(product.base_price.amount()).bind(&product.image_url).bind(product.active)
            .bind(Json(&product.variations)).bind(Json(&product.additionals))
            .bind(product.created_at).bind(product.updated_at)
            .execute(&self.pool).await.map_err(db_error("catalog.save_product"))?;
        Ok(())
    }

    async fn stock_levels(&self) -> Result<Vec<StockLevel>> {
        let rows = sqlx::query_as::<_, StockRow>("SELECT product_id, quantity, low_alert, updated_at FROM stock_levels")
            .fetch_all(&self.pool).await.map_err(db_error("catalog.stock_levels"))?;
        rows.into_iter().map(|row| -> Result<StockLevel> { Ok(StockLevel {
            product_id: row.product_id,
            quantity: to_count("catalog.stock_levels", row.quantity)?,
            low_alert: to_count("catalog.stock_levels", row.low_alert)?,
            updated_at: row.updated_at,
        }) }).collect()
    }

    async fn set_stock(&self, level: &StockLevel) -> Result<()> {
        sqlx::query("INSERT INTO stock_levels (product_id, quantity, low_alert, updated_at) VALUES ($1, $2, $3, $4) \
                     ON CONFLICT (product_id) DO UPDATE SET quantity = $2, low_alert = $3, updated_at = $4")
            .bind(level.product_id).bind(to_i32("catalog.set_stock", level.quantity)?)
            .bind(to_i32("catalog.set_stock", level.low_alert)?).bind(level.updated_at)
            .execute(&self.pool).await.map_err(db_error("catalog.set_stock"))?;
        Ok(())
    }
}
