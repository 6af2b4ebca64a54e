//! Admin console routes.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::domain::aggregates::{Category, NewCoupon, Order, OrderDetails, OrderStatus, Product, ProductDraft, StockLevel};
use crate::domain::reports::{CustomerFilter, CustomerReport, ReportFilter, SalesReport};
use crate::services::{CouponView, InventoryItem};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/:id", get(get_order))
        .route("/admin/orders/:id/advance", post(advance_order))
        .route("/admin/board", get(order_board))
        .route("/admin/products", post(create_product))
        .route("/admin/products/:id", put(update_product).delete(deactivate_product))
        .route("/admin/categories", post(create_category))
        .route("/admin/inventory", get(inventory))
        .route("/admin/inventory/low", get(low_stock))
        .route("/admin/inventory/:product_id", put(set_stock))
        .route("/admin/coupons", get(list_coupons).post(create_coupon))
        .route("/admin/coupons/:id/toggle", post(toggle_coupon))
        .route("/admin/reports/sales", get(sales_report))
        .route("/admin/reports/sales.csv", get(sales_csv))
        .route("/admin/customers", get(customers))
}

#[derive(Debug, Deserialize)]
pub struct OrderParams { pub status: Option<OrderStatus> }

async fn list_orders(State(s): State<AppState>, Query(p): Query<OrderParams>) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(s.orders.list(p.status).await?))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderDetails>, ApiError> {
    Ok(Json(s.orders.get(id).await?))
}

async fn advance_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, ApiError> {
    Ok(Json(s.orders.advance(id).await?))
}

/// What the live board currently holds, newest first.
async fn order_board(State(s): State<AppState>) -> Json<Vec<Order>> {
    Json(s.board.snapshot().await)
}

async fn create_product(State(s): State<AppState>, Json(draft): Json<ProductDraft>) -> Result<(StatusCode, Json<Product>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.catalog.create_product(draft).await?)))
}

async fn update_product(State(s): State<AppState>, Path(id): Path<Uuid>, Json(draft): Json<ProductDraft>) -> Result<Json<Product>, ApiError> {
    Ok(Json(s.catalog.update_product(id, draft).await?))
}

async fn deactivate_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    s.catalog.deactivate_product(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest { pub name: String }

async fn create_category(State(s): State<AppState>, Json(r): Json<CreateCategoryRequest>) -> Result<(StatusCode, Json<Category>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.catalog.create_category(&r.name).await?)))
}

async fn inventory(State(s): State<AppState>) -> Result<Json<Vec<InventoryItem>>, ApiError> {
    Ok(Json(s.catalog.inventory().await?))
}

async fn low_stock(State(s): State<AppState>) -> Result<Json<Vec<InventoryItem>>, ApiError> {
    Ok(Json(s.catalog.low_stock().await?))
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub quantity: u32,
    #[serde(default)]
    pub low_alert: u32,
}

async fn set_stock(State(s): State<AppState>, Path(product_id): Path<Uuid>, Json(r): Json<StockRequest>) -> Result<Json<StockLevel>, ApiError> {
    Ok(Json(s.catalog.set_stock(product_id, r.quantity, r.low_alert).await?))
}

async fn list_coupons(State(s): State<AppState>) -> Result<Json<Vec<CouponView>>, ApiError> {
    Ok(Json(s.coupons.list().await?))
}

async fn create_coupon(State(s): State<AppState>, Json(r): Json<NewCoupon>) -> Result<(StatusCode, Json<CouponView>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.coupons.create(r).await?)))
}

async fn toggle_coupon(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CouponView>, ApiError> {
    Ok(Json(s.coupons.toggle(id).await?))
}

async fn sales_report(State(s): State<AppState>, Query(filter): Query<ReportFilter>) -> Result<Json<SalesReport>, ApiError> {
    Ok(Json(s.orders.sales_report(&filter).await?))
}

async fn sales_csv(State(s): State<AppState>, Query(filter): Query<ReportFilter>) -> Result<impl IntoResponse, ApiError> {
    let report = s.orders.sales_report(&filter).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], report.to_csv()))
}

async fn customers(State(s): State<AppState>, Query(filter): Query<CustomerFilter>) -> Result<Json<CustomerReport>, ApiError> {
    Ok(Json(s.orders.customers(&filter).await?))
}
