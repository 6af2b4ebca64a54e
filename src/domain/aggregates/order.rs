//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::cart::CartLine;
use crate::domain::identity::UserId;
use crate::domain::value_objects::{CouponCode, Customization, Money, Quantity};
use crate::store::StoreError;

/// Order progress. Moves forward one step at a time and never back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Received,
    Preparing,
    EnRoute,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [Self::Received, Self::Preparing, Self::EnRoute, Self::Delivered];

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Preparing),
            Self::Preparing => Some(Self::EnRoute),
            Self::EnRoute => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Preparing => "preparing",
            Self::EnRoute => "en_route",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|status| status.as_str() == s).ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

/// Payment is simulated; the method is only recorded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Pix,
    Cash,
    Card,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Cash => "cash",
            Self::Card => "card",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pix" => Ok(Self::Pix),
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            other => Err(OrderError::UnknownPaymentMethod(other.to_string())),
        }
    }
}

/// Totals fixed at order creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount: Money,
    pub total: Money,
}

impl Pricing {
    pub fn compute(lines: &[CartLine], delivery_fee: Money, discount: Money) -> Self {
        let subtotal: Money = lines.iter().map(CartLine::line_total).sum();
        let discount = discount.min(subtotal);
        Self { subtotal, delivery_fee, discount, total: subtotal.add(delivery_fee).saturating_sub(discount) }
    }
}

/// Customer details snapshotted on the order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// Everything needed to place an order except the generated identifiers.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub customer_id: Option<UserId>,
    pub customer: CustomerSnapshot,
    pub delivery_address: String,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub coupon_code: Option<CouponCode>,
    pub pricing: Pricing,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Option<UserId>,
    pub customer: CustomerSnapshot,
    pub delivery_address: String,
    pub(crate) status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub coupon_code: Option<CouponCode>,
    pub pricing: Pricing,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub customization: Customization,
}

impl OrderLine {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

impl Order {
    pub fn place(new: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            order_number: format!("ORD-{:08}", rand::random::<u32>() % 100_000_000),
            customer_id: new.customer_id,
            customer: new.customer,
            delivery_address: new.delivery_address,
            status: OrderStatus::Received,
            payment_method: new.payment_method,
            notes: new.notes,
            coupon_code: new.coupon_code,
            pricing: new.pricing,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> OrderStatus { self.status }
    pub fn total(&self) -> Money { self.pricing.total }

    /// Copies each cart line into an immutable order line.
    pub fn lines_from(&self, cart_lines: &[CartLine]) -> Vec<OrderLine> {
        cart_lines.iter().map(|line| OrderLine {
            id: Uuid::new_v4(),
            order_id: self.id,
            product_id: line.product_id,
            product_name: line.snapshot.name.clone(),
            quantity: line.quantity,
            unit_price: line.snapshot.unit_price,
            customization: line.customization.clone(),
        }).collect()
    }

    /// Moves to the next status, returning the previous one.
    pub fn advance(&mut self) -> Result<OrderStatus, OrderError> {
        let next = self.status.next().ok_or(OrderError::AlreadyDelivered)?;
        let previous = std::mem::replace(&mut self.status, next);
        self.touch();
        Ok(previous)
    }

    /// Moves to `target` only if it is the immediate next status.
    pub fn advance_to(&mut self, target: OrderStatus) -> Result<(), OrderError> {
        if self.status.next() != Some(target) {
            return Err(OrderError::InvalidTransition { from: self.status, to: target });
        }
        self.advance().map(|_| ())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// An order together with its lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

impl OrderDetails {
    /// Whether the stored total still matches the line snapshots.
    pub fn totals_consistent(&self) -> bool {
        let lines: Money = self.lines.iter().map(OrderLine::line_total).sum();
        let pricing = &self.order.pricing;
        lines == pricing.subtotal && pricing.total == lines.add(pricing.delivery_fee).saturating_sub(pricing.discount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order is already delivered")]
    AlreadyDelivered,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("unknown order status: {0}")]
    UnknownStatus(String),
    #[error("unknown payment method: {0}")]
    UnknownPaymentMethod(String),
    #[error("order not found")]
    NotFound,
    #[error(transparent)]
    Storage(#[from] StoreError),
}
