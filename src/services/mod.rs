//! Application services: the workflows that sit between the HTTP surface and
//! the persistence ports.

use std::sync::Arc;

use crate::store::{CartStore, CatalogStore, CouponStore, OrderStore};

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod coupon;
pub mod orders;
pub mod sessions;

pub use cart::{AttachError, CartService, MutationError};
pub use catalog::{CatalogService, InventoryItem};
pub use checkout::{CartClearFailed, CheckoutError, CheckoutService, Receipt};
pub use coupon::{AppliedCoupon, CouponService, CouponView};
pub use orders::OrderService;
pub use sessions::SessionRegistry;

/// The persistence ports a deployment wires in.
#[derive(Clone)]
pub struct Stores {
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
    pub coupons: Arc<dyn CouponStore>,
    pub catalog: Arc<dyn CatalogStore>,
}

impl Stores {
    /// All four ports served by one backend.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CartStore + OrderStore + CouponStore + CatalogStore + 'static,
    {
        Self { carts: store.clone(), orders: store.clone(), coupons: store.clone(), catalog: store }
    }
}

pub(crate) fn today() -> chrono::NaiveDate { chrono::Utc::now().date_naive() }
