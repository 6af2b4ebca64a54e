//! Persistence ports.
//!
//! Every call is asynchronous and may fail with a [`StoreError`]. Callers
//! wrap calls in [`bounded`] so that a request that never resolves still
//! ends in a typed error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::{CartLine, Category, Coupon, Order, OrderDetails, OrderLine, OrderStatus, Product, StockLevel};
use crate::domain::identity::{Identity, SessionToken, UserId};
use crate::domain::value_objects::CouponCode;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage unavailable during {operation}: {message}")]
    Unavailable { operation: &'static str, message: String },
    #[error("{operation} did not complete within {after_ms} ms")]
    TimedOut { operation: &'static str, after_ms: u64 },
    #[error("corrupt record during {operation}: {message}")]
    Corrupt { operation: &'static str, message: String },
    #[error("{operation} conflicted with existing data")]
    Conflict { operation: &'static str },
    #[error("record not found during {operation}")]
    NotFound { operation: &'static str },
}

impl StoreError {
    pub fn unavailable(operation: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Unavailable { operation, message: error.to_string() }
    }

    pub fn corrupt(operation: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Corrupt { operation, message: error.to_string() }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Unavailable { operation, .. }
            | Self::TimedOut { operation, .. }
            | Self::Corrupt { operation, .. }
            | Self::Conflict { operation }
            | Self::NotFound { operation } => operation,
        }
    }

    /// Transport-level failures worth retrying.
    pub fn is_retryable(&self) -> bool { matches!(self, Self::Unavailable { .. } | Self::TimedOut { .. }) }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Runs a store call with an upper time bound.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::TimedOut { operation, after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX) }),
    }
}

/// Cart lines keyed by owning identity.
///
/// Anonymous rows carry only the session token. Authenticated rows carry the
/// user id; transferred rows carry both.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Lines owned by `identity`, in insertion order.
    async fn load(&self, identity: &Identity) -> Result<Vec<CartLine>>;
    /// Atomically replaces every line owned by `identity`.
    async fn replace_all(&self, identity: &Identity, lines: &[CartLine]) -> Result<()>;
    /// Deletes every line owned by `identity`. Clearing an empty cart succeeds.
    async fn clear(&self, identity: &Identity) -> Result<()>;
    /// Re-owns the session's anonymous lines to `user`. Returns the number of lines moved.
    async fn transfer(&self, session: &SessionToken, user: UserId) -> Result<u64>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes the order header and its lines together: either both are
    /// stored or neither is.
    async fn insert_order_with_lines(&self, order: &Order, lines: &[OrderLine]) -> Result<()>;
    /// Removes an order and any of its lines.
    async fn delete_order(&self, order_id: Uuid) -> Result<()>;
    async fn get(&self, order_id: Uuid) -> Result<Option<OrderDetails>>;
    /// Newest first.
    async fn list(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;
    /// Compare-and-set on the status column: fails with `Conflict` when the
    /// stored status is not `expected`.
    async fn update_status(&self, order_id: Uuid, expected: OrderStatus, next: OrderStatus, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>>;
    async fn find_by_id(&self, coupon_id: Uuid) -> Result<Option<Coupon>>;
    /// Increments the use count only while it is below `max_uses`; fails with
    /// `Conflict` once the cap is reached.
    async fn record_use(&self, coupon_id: Uuid) -> Result<()>;
    /// Gives back a use taken by [`CouponStore::record_use`]. Never goes below zero.
    async fn release_use(&self, coupon_id: Uuid) -> Result<()>;
    /// Fails with `Conflict` when the code is taken.
    async fn insert(&self, coupon: &Coupon) -> Result<()>;
    async fn list(&self) -> Result<Vec<Coupon>>;
    async fn set_active(&self, coupon_id: Uuid, active: bool) -> Result<Coupon>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn categories(&self) -> Result<Vec<Category>>;
    async fn insert_category(&self, category: &Category) -> Result<()>;
    async fn products(&self, category: Option<Uuid>, include_inactive: bool) -> Result<Vec<Product>>;
    async fn product(&self, product_id: Uuid) -> Result<Option<Product>>;
    /// Inserts or replaces by id.
    async fn save_product(&self, product: &Product) -> Result<()>;
    async fn stock_levels(&self) -> Result<Vec<StockLevel>>;
    async fn set_stock(&self, level: &StockLevel) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded("cart.load", Duration::from_millis(10), std::future::pending()).await;
        assert_eq!(result, Err(StoreError::TimedOut { operation: "cart.load", after_ms: 10 }));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let result = bounded("cart.clear", Duration::from_secs(1), async { Err::<(), _>(StoreError::Conflict { operation: "cart.clear" }) }).await;
        assert_eq!(result.unwrap_err().operation(), "cart.clear");
    }
}
