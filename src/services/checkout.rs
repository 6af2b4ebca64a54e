//! Turns a cart into a placed order.
//!
//! Validation happens before any store call. Once validation passes, the rest
//! of the workflow runs on its own task: a caller that goes away does not
//! cancel an order half way, and the outcome is logged either way.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::cart::CartService;
use super::coupon::{AppliedCoupon, CouponService};
use crate::domain::aggregates::{Cart, CouponError, NewOrder, Order, OrderLine, Pricing};
use crate::domain::checkout::{CheckoutForm, FieldGroup};
use crate::domain::identity::{Identity, UserId};
use crate::domain::value_objects::Money;
use crate::realtime::{ChangeEvent, ChangeSink};
use crate::store::{bounded, OrderStore, StoreError};

const COMPENSATION_ATTEMPTS: u32 = 3;
const COMPENSATION_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{group} is invalid: {}", fields.join(", "))]
    ValidationFailed { group: FieldGroup, fields: Vec<String> },
    /// The order was not placed and the cart is untouched.
    #[error("order could not be placed: {0}")]
    PersistenceFailed(#[from] StoreError),
}

/// The order is placed but the cart still holds its lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[error("order {order_id} was placed but the cart could not be cleared: {reason}")]
pub struct CartClearFailed {
    pub order_id: Uuid,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Receipt {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    /// Why a submitted coupon was dropped at submission time.
    pub coupon_rejected: Option<String>,
    pub cart_clear_error: Option<CartClearFailed>,
}

#[derive(Clone)]
pub struct CheckoutService {
    carts: CartService,
    coupons: CouponService,
    orders: Arc<dyn OrderStore>,
    changes: Arc<dyn ChangeSink>,
    delivery_fee: Money,
    timeout: Duration,
}

impl CheckoutService {
    pub fn new(
        carts: CartService,
        coupons: CouponService,
        orders: Arc<dyn OrderStore>,
        changes: Arc<dyn ChangeSink>,
        delivery_fee: Money,
        timeout: Duration,
    ) -> Self {
        Self { carts, coupons, orders, changes, delivery_fee, timeout }
    }

    pub fn delivery_fee(&self) -> Money { self.delivery_fee }

    /// Places an order for `cart`, owned by `owner`.
    ///
    /// `customer` is the signed-in user, if any; guest checkout is allowed.
    pub async fn submit(&self, owner: &Identity, customer: Option<UserId>, cart: &Cart, form: &CheckoutForm) -> Result<Receipt, CheckoutError> {
        if cart.is_empty() {
            return Err(CheckoutError::ValidationFailed { group: FieldGroup::Cart, fields: vec!["items".into()] });
        }
        form.check().map_err(|(group, fields)| CheckoutError::ValidationFailed { group, fields })?;

        let this = self.clone();
        let owner = owner.clone();
        let cart = cart.clone();
        let form = form.clone();
        tokio::spawn(async move { this.place(owner, customer, cart, form).await })
            .await
            .map_err(|e| CheckoutError::PersistenceFailed(StoreError::unavailable("checkout", e)))?
    }

    async fn place(&self, owner: Identity, customer: Option<UserId>, cart: Cart, form: CheckoutForm) -> Result<Receipt, CheckoutError> {
        let (applied, coupon_rejected) = match form.coupon_code() {
            None => (None, None),
            Some(code) => match self.claim_coupon(code, cart.subtotal()).await {
                Ok(applied) => (Some(applied), None),
                Err(CouponError::Storage(e)) => return Err(e.into()),
                Err(rejection) => {
                    info!(identity = %owner, code, reason = %rejection, "Coupon dropped at checkout");
                    (None, Some(rejection.to_string()))
                }
            },
        };

        let discount = applied.as_ref().map_or(Money::ZERO, |a| a.discount);
        let order = Order::place(NewOrder {
            customer_id: customer,
            customer: form.customer_snapshot(),
            delivery_address: form.address.format(),
            payment_method: form.payment_method,
            notes: form.notes(),
            coupon_code: applied.as_ref().map(|a| a.code.clone()),
            pricing: Pricing::compute(cart.lines(), self.delivery_fee, discount),
        });
        let lines = order.lines_from(cart.lines());

        if let Err(e) = self.persist(&order, &lines).await {
            error!(identity = %owner, order_id = %order.id, error = %e, "Order not placed");
            if let Some(applied) = &applied {
                self.release_coupon(applied).await;
            }
            return Err(e.into());
        }
        info!(identity = %owner, order_id = %order.id, order_number = %order.order_number, total = %order.total(), "Order placed");

        self.announce(&order).await;

        let cart_clear_error = match self.carts.clear(&owner).await {
            Ok(()) => None,
            Err(e) => {
                warn!(identity = %owner, order_id = %order.id, error = %e, "Cart not cleared after order");
                Some(CartClearFailed { order_id: order.id, reason: e.to_string() })
            }
        };

        Ok(Receipt { order, lines, coupon_rejected, cart_clear_error })
    }

    /// Evaluates the coupon and takes one of its uses before the order is
    /// written. Losing the last use to a concurrent checkout reads as
    /// `Exhausted`, like any other rejection.
    async fn claim_coupon(&self, code: &str, subtotal: Money) -> Result<AppliedCoupon, CouponError> {
        let applied = self.coupons.apply(code, subtotal).await?;
        self.coupons.reserve(applied.coupon_id).await?;
        Ok(applied)
    }

    async fn release_coupon(&self, applied: &AppliedCoupon) {
        if let Err(e) = self.coupons.release(applied.coupon_id).await {
            warn!(code = %applied.code, error = %e, "Coupon use not released after failed order");
        }
    }

    /// Header and lines in one write. A timeout leaves the outcome unknown, so
    /// the order is deleted again to keep "not placed" true for the caller.
    async fn persist(&self, order: &Order, lines: &[OrderLine]) -> Result<(), StoreError> {
        let written = bounded("orders.insert", self.timeout, self.orders.insert_order_with_lines(order, lines)).await;
        if let Err(e @ StoreError::TimedOut { .. }) = &written {
            warn!(order_id = %order.id, error = %e, "Order write outcome unknown, removing it");
            self.compensate(order.id).await;
        }
        written
    }

    async fn compensate(&self, order_id: Uuid) {
        for attempt in 1..=COMPENSATION_ATTEMPTS {
            match bounded("orders.delete", self.timeout, self.orders.delete_order(order_id)).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(order_id = %order_id, attempt, error = %e, "Compensating delete failed");
                    tokio::time::sleep(COMPENSATION_BACKOFF * attempt).await;
                }
            }
        }
        error!(order_id = %order_id, "Order may remain after {COMPENSATION_ATTEMPTS} delete attempts");
    }

    async fn announce(&self, order: &Order) {
        let published = match ChangeEvent::insert("orders", order.id, order) {
            Ok(event) => self.changes.publish(event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            warn!(order_id = %order.id, error = %e, "Order change not published");
        }
    }
}
