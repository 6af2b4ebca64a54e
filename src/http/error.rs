use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::aggregates::{Cart, CartError, CatalogError, CouponError, OrderError};
use crate::domain::checkout::FieldGroup;
use crate::domain::identity::IdentityError;
use crate::services::{CheckoutError, MutationError};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A business rule said no; the request itself was well formed.
    #[error("{0}")]
    Rejected(String),

    #[error("{group} fields are missing or invalid")]
    ValidationFailed { group: FieldGroup, fields: Vec<String> },

    #[error("{message}")]
    CartNotSaved { message: String, cart: Option<Cart> },

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Rejected(_) => "rejected",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::CartNotSaved { .. } => "cart_not_saved",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Rejected(_) | Self::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CartNotSaved { .. } | Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({ "error": self.code(), "message": self.to_string() });
        match self {
            Self::ValidationFailed { group, fields } => {
                body["group"] = json!(group);
                body["fields"] = json!(fields);
            }
            Self::CartNotSaved { cart: Some(cart), .. } => {
                body["cart"] = serde_json::to_value(&cart).unwrap_or(Value::Null);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::NotFound(e.to_string()),
            StoreError::Conflict { .. } => Self::Conflict(e.to_string()),
            StoreError::Unavailable { .. } | StoreError::TimedOut { .. } => Self::Unavailable(e.to_string()),
            StoreError::Corrupt { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self { Self::BadRequest(e.to_string()) }
}

impl From<CartError> for ApiError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::LineNotFound => Self::NotFound(e.to_string()),
            CartError::InvalidQuantity => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<MutationError> for ApiError {
    fn from(e: MutationError) -> Self {
        match e {
            MutationError::Rejected(e) => e.into(),
            MutationError::Load(e) => e.into(),
            MutationError::NotSaved { error, reconciled } => Self::CartNotSaved { message: error.to_string(), cart: reconciled },
        }
    }
}

impl From<CouponError> for ApiError {
    fn from(e: CouponError) -> Self {
        match e {
            CouponError::Storage(e) => e.into(),
            CouponError::NotFound => Self::NotFound(e.to_string()),
            CouponError::Duplicate => Self::Conflict(e.to_string()),
            CouponError::InvalidCode(_) | CouponError::Invalid(_) => Self::BadRequest(e.to_string()),
            CouponError::MinimumNotMet { .. }
            | CouponError::Inactive
            | CouponError::NotYetValid
            | CouponError::Expired
            | CouponError::Exhausted => Self::Rejected(e.to_string()),
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::ValidationFailed { group, fields } => Self::ValidationFailed { group, fields },
            CheckoutError::PersistenceFailed(_) => Self::Unavailable(e.to_string()),
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Storage(e) => e.into(),
            OrderError::NotFound => Self::NotFound(e.to_string()),
            OrderError::AlreadyDelivered | OrderError::InvalidTransition { .. } => Self::Conflict(e.to_string()),
            OrderError::UnknownStatus(_) | OrderError::UnknownPaymentMethod(_) => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Storage(e) => e.into(),
            CatalogError::NotFound => Self::NotFound(e.to_string()),
            CatalogError::Invalid(_) => Self::BadRequest(e.to_string()),
            CatalogError::Inactive | CatalogError::UnknownVariation(_) | CatalogError::UnknownAdditional(_) => Self::Rejected(e.to_string()),
        }
    }
}
