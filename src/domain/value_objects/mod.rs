//! Value Objects for the storefront

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coupon code value object. Codes compare case-insensitively, so they are
/// kept upper-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CouponCode(String);

impl CouponCode {
    pub fn new(value: impl Into<String>) -> Result<Self, CouponCodeError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(CouponCodeError::Empty); }
        if value.chars().count() > 50 { return Err(CouponCodeError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for CouponCode {
    type Error = CouponCodeError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<CouponCode> for String {
    fn from(code: CouponCode) -> Self { code.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponCodeError {
    #[error("coupon code is empty")]
    Empty,
    #[error("coupon code is longer than 50 characters")]
    TooLong,
}

/// Money value object. Amounts are kept at two decimal places.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
    pub fn from_cents(cents: i64) -> Self { Self(Decimal::new(cents, 2)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_negative(&self) -> bool { self.0.is_sign_negative() && !self.0.is_zero() }
    pub fn add(self, other: Money) -> Money { Money(self.0 + other.0) }
    pub fn multiply(self, qty: Quantity) -> Money { Money(self.0 * Decimal::from(qty.value())) }
    /// Subtracts, flooring at zero.
    pub fn saturating_sub(self, other: Money) -> Money { Money((self.0 - other.0).max(Decimal::ZERO)) }
    pub fn percent(self, pct: Decimal) -> Money { Money::new(self.0 * pct / Decimal::ONE_HUNDRED) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self { iter.fold(Money::ZERO, Money::add) }
}

/// Quantity value object. A cart or order line never holds zero units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> Option<Self> { (value > 0).then_some(Self(value)) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0)) }
    /// Returns `None` when the result would drop below one.
    pub fn subtract(&self, other: u32) -> Option<Self> { self.0.checked_sub(other).and_then(Self::new) }
}

impl TryFrom<u32> for Quantity {
    type Error = QuantityError;
    fn try_from(value: u32) -> Result<Self, Self::Error> { Self::new(value).ok_or(QuantityError::Zero) }
}

impl From<Quantity> for u32 {
    fn from(qty: Quantity) -> Self { qty.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity must be at least 1")]
    Zero,
}

/// Selected size/variation and add-ons of a cart or order line.
///
/// Add-on ids are sorted and deduplicated on construction, so two payloads
/// that select the same options compare equal no matter the selection order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawCustomization")]
pub struct Customization {
    variation_id: Option<String>,
    additional_ids: Vec<String>,
}

#[derive(Deserialize)]
struct RawCustomization {
    #[serde(default)]
    variation_id: Option<String>,
    #[serde(default)]
    additional_ids: Vec<String>,
}

impl From<RawCustomization> for Customization {
    fn from(raw: RawCustomization) -> Self { Self::new(raw.variation_id, raw.additional_ids) }
}

impl Customization {
    pub fn new(variation_id: Option<String>, additional_ids: impl IntoIterator<Item = String>) -> Self {
        let mut additional_ids: Vec<String> = additional_ids.into_iter().collect();
        additional_ids.sort();
        additional_ids.dedup();
        Self { variation_id: variation_id.filter(|v| !v.is_empty()), additional_ids }
    }

    pub fn variation_id(&self) -> Option<&str> { self.variation_id.as_deref() }
    pub fn additional_ids(&self) -> &[String] { &self.additional_ids }
    pub fn is_plain(&self) -> bool { self.variation_id.is_none() && self.additional_ids.is_empty() }

    /// Stable string form used as part of the cart-line uniqueness key.
    pub fn key(&self) -> String {
        format!("v={};a={}", self.variation_id.as_deref().unwrap_or(""), self.additional_ids.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coupon_code() {
        let code = CouponCode::new("  primeira10 ").unwrap();
        assert_eq!(code.as_str(), "PRIMEIRA10");
        assert_eq!(CouponCode::new("   "), Err(CouponCodeError::Empty));
    }

    #[test]
    fn test_money_rounding_and_percent() {
        assert_eq!(Money::new(Decimal::new(10005, 3)), Money::from_cents(1001));
        assert_eq!(Money::from_cents(5000).percent(Decimal::TEN), Money::from_cents(500));
        assert_eq!(Money::from_cents(300).saturating_sub(Money::from_cents(500)), Money::ZERO);
        assert_eq!(Money::from_cents(1290).to_string(), "12.90");
    }

    #[test]
    fn test_quantity_never_zero() {
        assert!(Quantity::new(0).is_none());
        let q = Quantity::new(2).unwrap();
        assert_eq!(q.subtract(1).map(|q| q.value()), Some(1));
        assert!(q.subtract(2).is_none());
        assert!(serde_json::from_str::<Quantity>("0").is_err());
    }

    #[test]
    fn test_customization_ignores_selection_order() {
        let a = Customization::new(Some("large".into()), vec!["bacon".into(), "cheese".into()]);
        let b = Customization::new(Some("large".into()), vec!["cheese".into(), "bacon".into(), "bacon".into()]);
        assert_eq!(a, b);
        assert_eq!(a.key(), "v=large;a=bacon,cheese");

        let decoded: Customization = serde_json::from_str(r#"{"additional_ids":["z","a"]}"#).unwrap();
        assert_eq!(decoded.additional_ids(), ["a".to_string(), "z".to_string()]);
        assert!(Customization::default().is_plain());
    }
}
