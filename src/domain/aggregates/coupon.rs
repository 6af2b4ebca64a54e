//! Coupon Aggregate

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};
use crate::domain::value_objects::{CouponCode, CouponCodeError, Money};
use crate::store::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

impl DiscountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

/// Admin-facing lifecycle label, checked in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    Inactive,
    Exhausted,
    Scheduled,
    Expired,
    Active,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: CouponCode,
    pub description: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub minimum_order: Money,
    pub max_uses: Option<u32>,
    pub uses: u32,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    pub fn status(&self, today: NaiveDate) -> CouponStatus {
        match self.check_usable(today) {
            Ok(()) => CouponStatus::Active,
            Err(CouponError::Inactive) => CouponStatus::Inactive,
            Err(CouponError::Exhausted) => CouponStatus::Exhausted,
            Err(CouponError::NotYetValid) => CouponStatus::Scheduled,
            Err(_) => CouponStatus::Expired,
        }
    }

    /// Active flag, usage cap and validity window; the order value is
    /// checked separately by [`Coupon::discount_for`].
    pub fn check_usable(&self, today: NaiveDate) -> Result<(), CouponError> {
        if !self.active { return Err(CouponError::Inactive); }
        if self.max_uses.is_some_and(|cap| self.uses >= cap) { return Err(CouponError::Exhausted); }
        if self.valid_from.is_some_and(|from| today < from) { return Err(CouponError::NotYetValid); }
        if self.valid_until.is_some_and(|until| today > until) { return Err(CouponError::Expired); }
        Ok(())
    }

    /// Discount for `subtotal`, never more than the subtotal itself.
    pub fn discount_for(&self, subtotal: Money, today: NaiveDate) -> Result<Money, CouponError> {
        self.check_usable(today)?;
        if subtotal < self.minimum_order {
            return Err(CouponError::MinimumNotMet { minimum: self.minimum_order });
        }
        let computed = match self.kind {
            DiscountKind::Percentage => subtotal.percent(self.value),
            DiscountKind::Fixed => Money::new(self.value),
        };
        Ok(computed.min(subtotal))
    }
}

/// Payload for creating a coupon from the admin console.
#[derive(Clone, Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_new_coupon"))]
pub struct NewCoupon {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub kind: DiscountKind,
    #[validate(custom = "validate_positive")]
    pub value: Decimal,
    #[serde(default)]
    pub minimum_order: Money,
    pub max_uses: Option<u32>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_positive() && !value.is_zero() { Ok(()) } else { Err(ValidationError::new("not_positive")) }
}

fn validate_new_coupon(coupon: &NewCoupon) -> Result<(), ValidationError> {
    if coupon.kind == DiscountKind::Percentage && coupon.value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("percentage_over_100"));
    }
    if coupon.minimum_order.is_negative() {
        return Err(ValidationError::new("negative_minimum"));
    }
    if let (Some(from), Some(until)) = (coupon.valid_from, coupon.valid_until) {
        if from > until { return Err(ValidationError::new("window_inverted")); }
    }
    Ok(())
}

impl NewCoupon {
    pub fn into_coupon(self) -> Result<Coupon, CouponError> {
        self.validate().map_err(|e| CouponError::Invalid(e.to_string()))?;
        Ok(Coupon {
            id: Uuid::new_v4(),
            code: CouponCode::new(self.code)?,
            description: self.description,
            kind: self.kind,
            value: self.value,
            minimum_order: self.minimum_order,
            max_uses: self.max_uses,
            uses: 0,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            active: true,
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("coupon not found")]
    NotFound,
    #[error("order subtotal is below the coupon minimum of {minimum}")]
    MinimumNotMet { minimum: Money },
    #[error("coupon is not active")]
    Inactive,
    #[error("coupon is not valid yet")]
    NotYetValid,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon usage limit reached")]
    Exhausted,
    #[error("coupon code already exists")]
    Duplicate,
    #[error("invalid coupon code: {0}")]
    InvalidCode(#[from] CouponCodeError),
    #[error("invalid coupon: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate { NaiveDate::from_ymd_opt(2024, 6, 1).unwrap() }

    fn coupon(code: &str, kind: DiscountKind, value: i64, minimum: i64) -> Coupon {
        NewCoupon {
            code: code.into(),
            description: String::new(),
            kind,
            value: Decimal::from(value),
            minimum_order: Money::new(Decimal::from(minimum)),
            max_uses: None,
            valid_from: None,
            valid_until: None,
        }.into_coupon().unwrap()
    }

    #[test]
    fn test_fixed_coupon_minimum() {
        let frete5 = coupon("FRETE5", DiscountKind::Fixed, 5, 30);
        assert_eq!(frete5.discount_for(Money::from_cents(2500), today()), Err(CouponError::MinimumNotMet { minimum: Money::from_cents(3000) }));
        assert_eq!(frete5.discount_for(Money::from_cents(3500), today()), Ok(Money::from_cents(500)));
    }

    #[test]
    fn test_percentage_coupon() {
        let primeira10 = coupon("primeira10", DiscountKind::Percentage, 10, 20);
        assert_eq!(primeira10.code.as_str(), "PRIMEIRA10");
        assert_eq!(primeira10.discount_for(Money::from_cents(5000), today()), Ok(Money::from_cents(500)));
    }

    #[test]
    fn test_fixed_discount_clamped_to_subtotal() {
        let big = coupon("BIG", DiscountKind::Fixed, 50, 0);
        assert_eq!(big.discount_for(Money::from_cents(1200), today()), Ok(Money::from_cents(1200)));
    }

    #[test]
    fn test_usability_and_status() {
        let mut c = coupon("NATAL20", DiscountKind::Percentage, 20, 50);
        assert_eq!(c.status(today()), CouponStatus::Active);
        c.max_uses = Some(50);
        c.uses = 50;
        assert_eq!(c.status(today()), CouponStatus::Exhausted);
        c.uses = 10;
        c.valid_from = NaiveDate::from_ymd_opt(2024, 12, 15);
        assert_eq!(c.status(today()), CouponStatus::Scheduled);
        c.valid_from = None;
        c.valid_until = NaiveDate::from_ymd_opt(2023, 12, 31);
        assert_eq!(c.discount_for(Money::from_cents(10000), today()), Err(CouponError::Expired));
        c.active = false;
        assert_eq!(c.status(today()), CouponStatus::Inactive);
    }

    #[test]
    fn test_new_coupon_validation() {
        let mut draft = NewCoupon {
            code: "OFF".into(),
            description: String::new(),
            kind: DiscountKind::Percentage,
            value: Decimal::from(120),
            minimum_order: Money::ZERO,
            max_uses: None,
            valid_from: None,
            valid_until: None,
        };
        assert!(matches!(draft.clone().into_coupon(), Err(CouponError::Invalid(_))));
        draft.value = Decimal::ZERO;
        assert!(draft.clone().into_coupon().is_err());
        draft.value = Decimal::from(15);
        assert!(draft.into_coupon().is_ok());
    }
}
