//! HTTP surface.

use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::domain::aggregates::{Cart, CartLine};
use crate::domain::identity::Identity;
use crate::domain::value_objects::Money;
use crate::realtime::{ChangeSink, OrderBoard};
use crate::services::{CartService, CatalogService, CheckoutService, CouponService, OrderService, SessionRegistry, Stores};

pub mod admin;
pub mod error;
pub mod identity;
pub mod storefront;

pub use error::ApiError;
pub use identity::RequestIdentity;

#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub sessions: SessionRegistry,
    pub coupons: CouponService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub catalog: CatalogService,
    pub board: OrderBoard,
    pub currency: Arc<str>,
}

impl AppState {
    pub fn new(stores: Stores, changes: Arc<dyn ChangeSink>, config: &Config) -> Self {
        let timeout = config.store_timeout;
        let carts = CartService::new(stores.carts, timeout);
        let coupons = CouponService::new(stores.coupons, timeout);
        let checkout = CheckoutService::new(carts.clone(), coupons.clone(), stores.orders.clone(), changes.clone(), config.delivery_fee, timeout);
        Self {
            orders: OrderService::new(stores.orders, changes, timeout),
            catalog: CatalogService::new(stores.catalog, timeout),
            board: OrderBoard::new(),
            sessions: SessionRegistry::new(carts.clone(), timeout * 2),
            currency: Arc::from(config.currency.as_str()),
            carts,
            coupons,
            checkout,
        }
    }
}

/// Cart as presented to the storefront.
#[derive(Debug, Serialize)]
pub struct CartView {
    pub owner: Identity,
    pub lines: Vec<CartLine>,
    pub item_count: u32,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub currency: String,
}

impl CartView {
    pub fn new(state: &AppState, owner: Identity, cart: Cart) -> Self {
        Self {
            owner,
            item_count: cart.item_count(),
            subtotal: cart.subtotal(),
            delivery_fee: state.checkout.delivery_fee(),
            currency: state.currency.to_string(),
            lines: cart.into_lines(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront"})) }))
        .nest("/api/v1", storefront::routes().merge(admin::routes()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
