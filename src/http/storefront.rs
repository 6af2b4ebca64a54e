//! Customer-facing routes: session, cart, coupons, checkout and menu.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::{ApiError, AppState, CartView, RequestIdentity};
use crate::domain::aggregates::{CartError, Category, Product};
use crate::domain::checkout::CheckoutForm;
use crate::domain::identity::{Identity, SessionToken, UserId};
use crate::domain::value_objects::{Customization, Money, Quantity};
use crate::services::{AppliedCoupon, Receipt};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(start_session))
        .route("/session/sign-in", post(sign_in))
        .route("/session/sign-out", post(sign_out))
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/items", post(add_item))
        .route("/cart/items/remove", post(remove_item))
        .route("/coupons/apply", post(apply_coupon))
        .route("/checkout", post(checkout))
        .route("/categories", get(list_categories))
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse { pub session_token: SessionToken }

async fn start_session() -> (StatusCode, Json<SessionResponse>) {
    (StatusCode::CREATED, Json(SessionResponse { session_token: SessionToken::generate() }))
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest { pub user_id: UserId }

#[derive(Debug, Serialize)]
pub struct SessionState {
    /// Who owns the cart now: the user, or the session when the transfer failed.
    pub cart_owner: Identity,
    pub cart: Option<CartView>,
}

impl SessionState {
    async fn load(s: &AppState, owner: Identity) -> Self {
        let cart = match s.carts.load(&owner).await {
            Ok(cart) => Some(CartView::new(s, owner.clone(), cart)),
            Err(e) => {
                warn!(identity = %owner, error = %e, "Cart not loaded after identity change");
                None
            }
        };
        Self { cart_owner: owner, cart }
    }
}

async fn sign_in(State(s): State<AppState>, identity: RequestIdentity, Json(r): Json<SignInRequest>) -> Json<SessionState> {
    let owner = s.sessions.sign_in(&identity.session, r.user_id).await;
    Json(SessionState::load(&s, owner).await)
}

async fn sign_out(State(s): State<AppState>, identity: RequestIdentity) -> Json<SessionState> {
    let owner = s.sessions.sign_out(&identity.session).await;
    Json(SessionState::load(&s, owner).await)
}

async fn get_cart(State(s): State<AppState>, identity: RequestIdentity) -> Result<Json<CartView>, ApiError> {
    let owner = identity.owner();
    let cart = s.carts.load(&owner).await?;
    Ok(Json(CartView::new(&s, owner, cart)))
}

async fn clear_cart(State(s): State<AppState>, identity: RequestIdentity) -> Result<StatusCode, ApiError> {
    s.carts.clear(&identity.owner()).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn one() -> u32 { 1 }

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub variation_id: Option<String>,
    #[serde(default)]
    pub additional_ids: Vec<String>,
    #[serde(default = "one")]
    pub quantity: u32,
}

async fn add_item(State(s): State<AppState>, identity: RequestIdentity, Json(r): Json<AddItemRequest>) -> Result<Json<CartView>, ApiError> {
    let quantity = Quantity::new(r.quantity).ok_or(CartError::InvalidQuantity)?;
    let product = s.catalog.available_product(r.product_id).await?;
    let line = product.cart_line(r.variation_id.as_deref(), &r.additional_ids, quantity)?;
    let owner = identity.owner();
    let cart = s.carts.mutate(&owner, |cart| {
        cart.add(line);
        Ok(())
    }).await?;
    Ok(Json(CartView::new(&s, owner, cart)))
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub customization: Customization,
    /// Drop the whole line instead of one unit.
    #[serde(default)]
    pub all: bool,
}

async fn remove_item(State(s): State<AppState>, identity: RequestIdentity, Json(r): Json<RemoveItemRequest>) -> Result<Json<CartView>, ApiError> {
    let owner = identity.owner();
    let cart = s.carts.mutate(&owner, |cart| {
        if r.all { cart.remove_line(r.product_id, &r.customization) } else { cart.remove_one(r.product_id, &r.customization) }
    }).await?;
    Ok(Json(CartView::new(&s, owner, cart)))
}

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest { pub code: String, pub subtotal: Money }

async fn apply_coupon(State(s): State<AppState>, Json(r): Json<ApplyCouponRequest>) -> Result<Json<AppliedCoupon>, ApiError> {
    Ok(Json(s.coupons.apply(&r.code, r.subtotal).await?))
}

async fn checkout(State(s): State<AppState>, identity: RequestIdentity, Json(form): Json<CheckoutForm>) -> Result<(StatusCode, Json<Receipt>), ApiError> {
    let owner = identity.owner();
    let cart = s.carts.load(&owner).await?;
    let receipt = s.checkout.submit(&owner, owner.user(), &cart, &form).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn list_categories(State(s): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(s.catalog.categories().await?))
}

#[derive(Debug, Deserialize)]
pub struct MenuParams { pub category: Option<Uuid> }

async fn list_products(State(s): State<AppState>, Query(p): Query<MenuParams>) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(s.catalog.menu(p.category).await?))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>, ApiError> {
    Ok(Json(s.catalog.available_product(id).await?))
}
