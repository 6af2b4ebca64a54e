//! In-memory store for tests and database-less runs.
//!
//! Any operation can be made to fail or to hang with [`MemoryStore::fail_on`]
//! and [`MemoryStore::stall_on`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CartStore, CatalogStore, CouponStore, OrderStore, Result, StoreError};
use crate::domain::aggregates::{CartLine, Category, Coupon, Order, OrderDetails, OrderLine, OrderStatus, Product, StockLevel};
use crate::domain::identity::{Identity, SessionToken, UserId};
use crate::domain::value_objects::CouponCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    Fail,
    Stall,
}

/// Raw cart row as the persistence layer sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartRow {
    pub session_id: Option<SessionToken>,
    pub user_id: Option<UserId>,
    pub line: CartLine,
}

impl CartRow {
    fn owned_by(&self, identity: &Identity) -> bool {
        match identity {
            Identity::Anonymous(session) => self.user_id.is_none() && self.session_id.as_ref() == Some(session),
            Identity::Authenticated(user) => self.user_id == Some(*user),
        }
    }
}

#[derive(Default)]
struct Tables {
    cart: Vec<CartRow>,
    orders: Vec<Order>,
    order_lines: Vec<OrderLine>,
    coupons: Vec<Coupon>,
    categories: Vec<Category>,
    products: Vec<Product>,
    stock: Vec<StockLevel>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: RwLock<HashMap<&'static str, Fault>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Makes `operation` fail with `Unavailable` until [`MemoryStore::recover`].
    pub async fn fail_on(&self, operation: &'static str) {
        self.faults.write().await.insert(operation, Fault::Fail);
    }

    /// Makes `operation` never resolve until [`MemoryStore::recover`].
    pub async fn stall_on(&self, operation: &'static str) {
        self.faults.write().await.insert(operation, Fault::Stall);
    }

    pub async fn recover(&self, operation: &'static str) {
        self.faults.write().await.remove(operation);
    }

    pub async fn cart_rows(&self) -> Vec<CartRow> { self.tables.read().await.cart.clone() }

    pub async fn order_count(&self) -> usize { self.tables.read().await.orders.len() }

    pub async fn order_line_count(&self) -> usize { self.tables.read().await.order_lines.len() }

    async fn check(&self, operation: &'static str) -> Result<()> {
        let fault = self.faults.read().await.get(operation).copied();
        match fault {
            None => Ok(()),
            Some(Fault::Fail) => Err(StoreError::unavailable(operation, "injected fault")),
            Some(Fault::Stall) => std::future::pending().await,
        }
    }
}

fn row_for(identity: &Identity, line: &CartLine) -> CartRow {
    match identity {
        Identity::Anonymous(session) => CartRow { session_id: Some(session.clone()), user_id: None, line: line.clone() },
        Identity::Authenticated(user) => CartRow { session_id: None, user_id: Some(*user), line: line.clone() },
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn load(&self, identity: &Identity) -> Result<Vec<CartLine>> {
        self.check("cart.load").await?;
        let tables = self.tables.read().await;
        Ok(tables.cart.iter().filter(|r| r.owned_by(identity)).map(|r| r.line.clone()).collect())
    }

    async fn replace_all(&self, identity: &Identity, lines: &[CartLine]) -> Result<()> {
        self.check("cart.replace_all").await?;
        let mut tables = self.tables.write().await;
        tables.cart.retain(|r| !r.owned_by(identity));
        tables.cart.extend(lines.iter().map(|line| row_for(identity, line)));
        Ok(())
    }

    async fn clear(&self, identity: &Identity) -> Result<()> {
        self.check("cart.clear").await?;
        self.tables.write().await.cart.retain(|r| !r.owned_by(identity));
        Ok(())
    }

    async fn transfer(&self, session: &SessionToken, user: UserId) -> Result<u64> {
        self.check("cart.transfer").await?;
        let mut tables = self.tables.write().await;
        let mut moved = 0;
        for row in tables.cart.iter_mut().filter(|r| r.user_id.is_none() && r.session_id.as_ref() == Some(session)) {
            row.user_id = Some(user);
            moved += 1;
        }
        Ok(moved)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order_with_lines(&self, order: &Order, lines: &[OrderLine]) -> Result<()> {
        self.check("orders.insert").await?;
        self.check("orders.insert_lines").await?;
        let mut tables = self.tables.write().await;
        if tables.orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::Conflict { operation: "orders.insert" });
        }
        if let Some(stray) = lines.iter().find(|l| l.order_id != order.id) {
            return Err(StoreError::corrupt("orders.insert_lines", format!("line for order {} in order {}", stray.order_id, order.id)));
        }
        tables.orders.push(order.clone());
        tables.order_lines.extend(lines.iter().cloned());
        Ok(())
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<()> {
        self.check("orders.delete").await?;
        let mut tables = self.tables.write().await;
        tables.order_lines.retain(|l| l.order_id != order_id);
        tables.orders.retain(|o| o.id != order_id);
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<OrderDetails>> {
        self.check("orders.get").await?;
        let tables = self.tables.read().await;
        Ok(tables.orders.iter().find(|o| o.id == order_id).map(|order| OrderDetails {
            order: order.clone(),
            lines: tables.order_lines.iter().filter(|l| l.order_id == order_id).cloned().collect(),
        }))
    }

    async fn list(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        self.check("orders.list").await?;
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables.orders.iter().filter(|o| status.map_or(true, |s| o.status() == s)).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(&self, order_id: Uuid, expected: OrderStatus, next: OrderStatus, at: DateTime<Utc>) -> Result<()> {
        self.check("orders.update_status").await?;
        let mut tables = self.tables.write().await;
        let order = tables.orders.iter_mut().find(|o| o.id == order_id).ok_or(StoreError::NotFound { operation: "orders.update_status" })?;
        if order.status != expected {
            return Err(StoreError::Conflict { operation: "orders.update_status" });
        }
        order.status = next;
        order.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        self.check("coupons.find").await?;
        Ok(self.tables.read().await.coupons.iter().find(|c| &c.code == code).cloned())
    }

    async fn find_by_id(&self, coupon_id: Uuid) -> Result<Option<Coupon>> {
        self.check("coupons.find").await?;
        Ok(self.tables.read().await.coupons.iter().find(|c| c.id == coupon_id).cloned())
    }

    async fn record_use(&self, coupon_id: Uuid) -> Result<()> {
        self.check("coupons.record_use").await?;
        let mut tables = self.tables.write().await;
        let coupon = tables.coupons.iter_mut().find(|c| c.id == coupon_id).ok_or(StoreError::NotFound { operation: "coupons.record_use" })?;
        if coupon.max_uses.is_some_and(|cap| coupon.uses >= cap) {
            return Err(StoreError::Conflict { operation: "coupons.record_use" });
        }
        coupon.uses = coupon.uses.saturating_add(1);
        Ok(())
    }

    async fn release_use(&self, coupon_id: Uuid) -> Result<()> {
        self.check("coupons.release_use").await?;
        let mut tables = self.tables.write().await;
        let coupon = tables.coupons.iter_mut().find(|c| c.id == coupon_id).ok_or(StoreError::NotFound { operation: "coupons.release_use" })?;
        coupon.uses = coupon.uses.saturating_sub(1);
        Ok(())
    }

    async fn insert(&self, coupon: &Coupon) -> Result<()> {
        self.check("coupons.insert").await?;
        let mut tables = self.tables.write().await;
        if tables.coupons.iter().any(|c| c.code == coupon.code) {
            return Err(StoreError::Conflict { operation: "coupons.insert" });
        }
        tables.coupons.push(coupon.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Coupon>> {
        self.check("coupons.list").await?;
        Ok(self.tables.read().await.coupons.clone())
    }

    async fn set_active(&self, coupon_id: Uuid, active: bool) -> Result<Coupon> {
        self.check("coupons.set_active").await?;
        let mut tables = self.tables.write().await;
        let coupon = tables.coupons.iter_mut().find(|c| c.id == coupon_id).ok_or(StoreError::NotFound { operation: "coupons.set_active" })?;
        coupon.active = active;
        Ok(coupon.clone())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        self.check("catalog.categories").await?;
        let mut categories = self.tables.read().await.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn insert_category(&self, category: &Category) -> Result<()> {
        self.check("catalog.insert_category").await?;
        let mut tables = self.tables.write().await;
        if tables.categories.iter().any(|c| c.name.eq_ignore_ascii_case(&category.name)) {
            return Err(StoreError::Conflict { operation: "catalog.insert_category" });
        }
        tables.categories.push(category.clone());
        Ok(())
    }

    async fn products(&self, category: Option<Uuid>, include_inactive: bool) -> Result<Vec<Product>> {
        self.check("catalog.products").await?;
        let tables = self.tables.read().await;
        let mut products: Vec<Product> = tables.products.iter()
            .filter(|p| include_inactive || p.active)
            .filter(|p| category.map_or(true, |c| p.category_id == Some(c)))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn product(&self, product_id: Uuid) -> Result<Option<Product>> {
        self.check("catalog.product").await?;
        Ok(self.tables.read().await.products.iter().find(|p| p.id == product_id).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        self.check("catalog.save_product").await?;
        let mut tables = self.tables.write().await;
        match tables.products.iter_mut().find(|p| p.id == product.id) {
            Some(existing) => *existing = product.clone(),
            None => tables.products.push(product.clone()),
        }
        Ok(())
    }

    async fn stock_levels(&self) -> Result<Vec<StockLevel>> {
        self.check("catalog.stock_levels").await?;
        Ok(self.tables.read().await.stock.clone())
    }

    async fn set_stock(&self, level: &StockLevel) -> Result<()> {
        self.check("catalog.set_stock").await?;
        let mut tables = self.tables.write().await;
        match tables.stock.iter_mut().find(|s| s.product_id == level.product_id) {
            Some(existing) => *existing = level.clone(),
            None => tables.stock.push(level.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::ProductSnapshot;
    use crate::domain::value_objects::{Customization, Money, Quantity};

    fn line(product: u128, qty: u32) -> CartLine {
        CartLine {
            product_id: Uuid::from_u128(product),
            snapshot: ProductSnapshot { name: "Batata".into(), unit_price: Money::from_cents(1890), image_url: None },
            quantity: Quantity::new(qty).unwrap(),
            customization: Customization::default(),
        }
    }

    #[tokio::test]
    async fn test_cart_scoped_by_identity() {
        let store = MemoryStore::new();
        let session = Identity::Anonymous(SessionToken::parse("s1").unwrap());
        let other = Identity::Anonymous(SessionToken::parse("s2").unwrap());

        store.replace_all(&session, &[line(1, 2)]).await.unwrap();
        store.replace_all(&other, &[line(2, 1)]).await.unwrap();
        store.replace_all(&session, &[line(3, 1)]).await.unwrap();

        let loaded = store.load(&session).await.unwrap();
        assert_eq!(loaded, vec![line(3, 1)]);
        store.clear(&session).await.unwrap();
        store.clear(&session).await.unwrap();
        assert!(store.load(&session).await.unwrap().is_empty());
        assert_eq!(store.load(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_sets_user_and_keeps_session() {
        let store = MemoryStore::new();
        let token = SessionToken::parse("s1").unwrap();
        let user = UserId::new(Uuid::new_v4());
        store.replace_all(&Identity::Anonymous(token.clone()), &[line(1, 2), line(2, 1)]).await.unwrap();

        assert_eq!(store.transfer(&token, user).await.unwrap(), 2);
        assert_eq!(store.transfer(&token, user).await.unwrap(), 0);
        assert!(store.load(&Identity::Anonymous(token.clone())).await.unwrap().is_empty());
        assert_eq!(store.load(&Identity::Authenticated(user)).await.unwrap().len(), 2);
        assert!(store.cart_rows().await.iter().all(|r| r.session_id == Some(token.clone()) && r.user_id == Some(user)));
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let store = MemoryStore::new();
        let identity = Identity::Anonymous(SessionToken::generate());
        store.fail_on("cart.load").await;
        assert!(matches!(store.load(&identity).await, Err(StoreError::Unavailable { operation: "cart.load", .. })));
        store.recover("cart.load").await;
        assert!(store.load(&identity).await.is_ok());
    }
}
