//! Coupon lookup, evaluation and admin management.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::today;
use crate::domain::aggregates::{Coupon, CouponError, CouponStatus, NewCoupon};
use crate::domain::value_objects::{CouponCode, Money};
use crate::store::{bounded, CouponStore, StoreError};

/// Result of a successful evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppliedCoupon {
    pub coupon_id: Uuid,
    pub code: CouponCode,
    pub discount: Money,
}

/// A coupon with its derived lifecycle label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CouponView {
    #[serde(flatten)]
    pub coupon: Coupon,
    pub status: CouponStatus,
}

impl CouponView {
    fn at(coupon: Coupon, today: NaiveDate) -> Self {
        let status = coupon.status(today);
        Self { coupon, status }
    }
}

#[derive(Clone)]
pub struct CouponService {
    store: Arc<dyn CouponStore>,
    timeout: Duration,
}

impl CouponService {
    pub fn new(store: Arc<dyn CouponStore>, timeout: Duration) -> Self { Self { store, timeout } }

    /// Evaluates `code` against `subtotal` from scratch; nothing is cached
    /// between calls.
    pub async fn apply(&self, code: &str, subtotal: Money) -> Result<AppliedCoupon, CouponError> {
        self.apply_on(code, subtotal, today()).await
    }

    pub async fn apply_on(&self, code: &str, subtotal: Money, today: NaiveDate) -> Result<AppliedCoupon, CouponError> {
        let code = CouponCode::new(code)?;
        let coupon = bounded("coupons.find", self.timeout, self.store.find_by_code(&code))
            .await?
            .ok_or(CouponError::NotFound)?;
        let discount = coupon.discount_for(subtotal, today)?;
        Ok(AppliedCoupon { coupon_id: coupon.id, code: coupon.code, discount })
    }

    /// Takes one use of the coupon. The store only grants it while the cap
    /// has room, so concurrent checkouts cannot push `uses` past `max_uses`.
    pub async fn reserve(&self, coupon_id: Uuid) -> Result<(), CouponError> {
        match bounded("coupons.record_use", self.timeout, self.store.record_use(coupon_id)).await {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict { .. }) => Err(CouponError::Exhausted),
            Err(StoreError::NotFound { .. }) => Err(CouponError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a use taken by [`CouponService::reserve`] for an order that was not placed.
    pub async fn release(&self, coupon_id: Uuid) -> Result<(), StoreError> {
        bounded("coupons.release_use", self.timeout, self.store.release_use(coupon_id)).await
    }

    pub async fn create(&self, new: NewCoupon) -> Result<CouponView, CouponError> {
        let coupon = new.into_coupon()?;
        match bounded("coupons.insert", self.timeout, self.store.insert(&coupon)).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => return Err(CouponError::Duplicate),
            Err(e) => return Err(e.into()),
        }
        info!(code = %coupon.code, "Created coupon");
        Ok(CouponView::at(coupon, today()))
    }

    pub async fn list(&self) -> Result<Vec<CouponView>, CouponError> {
        let today = today();
        let coupons = bounded("coupons.list", self.timeout, self.store.list()).await?;
        Ok(coupons.into_iter().map(|c| CouponView::at(c, today)).collect())
    }

    pub async fn toggle(&self, coupon_id: Uuid) -> Result<CouponView, CouponError> {
        let current = bounded("coupons.find", self.timeout, self.store.find_by_id(coupon_id))
            .await?
            .ok_or(CouponError::NotFound)?;
        let updated = bounded("coupons.set_active", self.timeout, self.store.set_active(coupon_id, !current.active))
            .await
            .map_err(|e| {
                warn!(coupon_id = %coupon_id, error = %e, "Coupon toggle failed");
                e
            })?;
        Ok(CouponView::at(updated, today()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::DiscountKind;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    fn new_coupon(code: &str, kind: DiscountKind, value: i64, minimum: i64) -> NewCoupon {
        NewCoupon {
            code: code.into(),
            description: String::new(),
            kind,
            value: Decimal::from(value),
            minimum_order: Money::new(Decimal::from(minimum)),
            max_uses: None,
            valid_from: None,
            valid_until: None,
        }
    }

    async fn service() -> (Arc<MemoryStore>, CouponService) {
        let store = Arc::new(MemoryStore::new());
        let coupons = CouponService::new(store.clone(), Duration::from_secs(1));
        coupons.create(new_coupon("FRETE5", DiscountKind::Fixed, 5, 30)).await.unwrap();
        coupons.create(new_coupon("PRIMEIRA10", DiscountKind::Percentage, 10, 20)).await.unwrap();
        (store, coupons)
    }

    #[tokio::test]
    async fn test_apply_known_codes() {
        let (_, coupons) = service().await;
        assert_eq!(
            coupons.apply("frete5", Money::from_cents(2500)).await,
            Err(CouponError::MinimumNotMet { minimum: Money::from_cents(3000) })
        );
        assert_eq!(coupons.apply(" Frete5 ", Money::from_cents(3500)).await.unwrap().discount, Money::from_cents(500));
        assert_eq!(coupons.apply("PRIMEIRA10", Money::from_cents(5000)).await.unwrap().discount, Money::from_cents(500));
        assert_eq!(coupons.apply("NOPE", Money::from_cents(5000)).await, Err(CouponError::NotFound));
    }

    #[tokio::test]
    async fn test_duplicate_and_toggle() {
        let (_, coupons) = service().await;
        assert_eq!(coupons.create(new_coupon("frete5", DiscountKind::Fixed, 1, 0)).await.unwrap_err(), CouponError::Duplicate);

        let id = coupons.apply("FRETE5", Money::from_cents(4000)).await.unwrap().coupon_id;
        let toggled = coupons.toggle(id).await.unwrap();
        assert_eq!(toggled.status, CouponStatus::Inactive);
        assert_eq!(coupons.apply("FRETE5", Money::from_cents(4000)).await, Err(CouponError::Inactive));
        assert_eq!(coupons.toggle(Uuid::nil()).await.unwrap_err(), CouponError::NotFound);
    }

    #[tokio::test]
    async fn test_toggle_does_not_list() {
        let (store, coupons) = service().await;
        let id = coupons.apply("PRIMEIRA10", Money::from_cents(4000)).await.unwrap().coupon_id;
        store.fail_on("coupons.list").await;
        assert_eq!(coupons.toggle(id).await.unwrap().status, CouponStatus::Inactive);
        assert_eq!(coupons.toggle(id).await.unwrap().status, CouponStatus::Active);
    }

    #[tokio::test]
    async fn test_reserve_stops_at_cap() {
        let (store, coupons) = service().await;
        let mut capped = new_coupon("UNICO", DiscountKind::Fixed, 3, 0);
        capped.max_uses = Some(2);
        let id = coupons.create(capped).await.unwrap().coupon.id;

        coupons.reserve(id).await.unwrap();
        coupons.reserve(id).await.unwrap();
        assert_eq!(coupons.reserve(id).await, Err(CouponError::Exhausted));
        assert_eq!(store.find_by_id(id).await.unwrap().unwrap().uses, 2);

        coupons.release(id).await.unwrap();
        coupons.reserve(id).await.unwrap();
        assert_eq!(store.find_by_id(id).await.unwrap().unwrap().uses, 2);
        assert_eq!(coupons.reserve(Uuid::nil()).await, Err(CouponError::NotFound));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_respect_cap() {
        let (store, coupons) = service().await;
        let mut capped = new_coupon("UNICO", DiscountKind::Fixed, 3, 0);
        capped.max_uses = Some(1);
        let id = coupons.create(capped).await.unwrap().coupon.id;

        let attempts: Vec<_> = (0..8).map(|_| {
            let coupons = coupons.clone();
            tokio::spawn(async move { coupons.reserve(id).await })
        }).collect();
        let mut granted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() { granted += 1; }
        }
        assert_eq!(granted, 1);
        assert_eq!(store.find_by_id(id).await.unwrap().unwrap().uses, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_typed() {
        let (store, coupons) = service().await;
        store.fail_on("coupons.find").await;
        assert!(matches!(coupons.apply("FRETE5", Money::from_cents(4000)).await, Err(CouponError::Storage(_))));
    }
}
