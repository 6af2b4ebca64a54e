//! Checkout form and its validation.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use validator::{Validate, ValidationError, ValidationErrors};
use crate::domain::aggregates::{CustomerSnapshot, PaymentMethod};

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CustomerInfo {
    #[validate(custom = "not_blank")]
    pub name: String,
    #[validate(custom = "not_blank")]
    pub phone: String,
    /// Optional; a blank value counts as absent.
    #[serde(deserialize_with = "blank_as_none")]
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct DeliveryAddress {
    #[validate(custom = "not_blank")]
    pub street: String,
    #[validate(custom = "not_blank")]
    pub number: String,
    pub complement: Option<String>,
    #[validate(custom = "not_blank")]
    pub neighborhood: String,
    pub city: Option<String>,
    pub zip_code: Option<String>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() { Err(ValidationError::new("required")) } else { Ok(()) }
}

impl DeliveryAddress {
    /// Free-text form stored on the order:
    /// `street, number (complement) - neighborhood, city - zip`.
    pub fn format(&self) -> String {
        let mut out = format!("{}, {}", self.street.trim(), self.number.trim());
        if let Some(complement) = present(&self.complement) { out.push_str(&format!(" ({complement})")); }
        out.push_str(&format!(" - {}", self.neighborhood.trim()));
        if let Some(city) = present(&self.city) { out.push_str(&format!(", {city}")); }
        if let Some(zip) = present(&self.zip_code) { out.push_str(&format!(" - {zip}")); }
        out
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn blank_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(present(&value).map(str::to_string))
}

/// Missing keys deserialize to empty values so that `check` reports them by group.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutForm {
    pub customer: CustomerInfo,
    pub address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub coupon_code: Option<String>,
}

/// Which part of the checkout was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Cart,
    Customer,
    Address,
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cart => "cart",
            Self::Customer => "customer",
            Self::Address => "address",
        })
    }
}

impl CheckoutForm {
    /// Customer fields first, then the address. Returns the failing group and field names.
    pub fn check(&self) -> Result<(), (FieldGroup, Vec<String>)> {
        self.customer.validate().map_err(|e| (FieldGroup::Customer, field_names(&e)))?;
        self.address.validate().map_err(|e| (FieldGroup::Address, field_names(&e)))?;
        Ok(())
    }

    pub fn customer_snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            name: self.customer.name.trim().to_string(),
            phone: self.customer.phone.trim().to_string(),
            email: present(&self.customer.email).map(str::to_string),
        }
    }

    pub fn notes(&self) -> Option<String> { present(&self.notes).map(str::to_string) }

    pub fn coupon_code(&self) -> Option<&str> { present(&self.coupon_code) }
}

fn field_names(errors: &ValidationErrors) -> Vec<String> {
    let mut names: Vec<String> = errors.field_errors().keys().map(|k| k.to_string()).collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> CheckoutForm {
        CheckoutForm {
            customer: CustomerInfo { name: "João Silva".into(), phone: "(11) 99999-9999".into(), email: None },
            address: DeliveryAddress {
                street: "Rua das Flores".into(),
                number: "123".into(),
                complement: Some("apto 4".into()),
                neighborhood: "Centro".into(),
                city: Some("São Paulo".into()),
                zip_code: None,
            },
            ..CheckoutForm::default()
        }
    }

    #[test]
    fn test_valid_form() {
        let form = valid_form();
        assert_eq!(form.check(), Ok(()));
        assert_eq!(form.address.format(), "Rua das Flores, 123 (apto 4) - Centro, São Paulo");
    }

    #[test]
    fn test_missing_customer_fields() {
        let mut form = valid_form();
        form.customer.phone = "  ".into();
        form.address.street = String::new();
        assert_eq!(form.check(), Err((FieldGroup::Customer, vec!["phone".to_string()])));
    }

    #[test]
    fn test_missing_address_fields() {
        let mut form = valid_form();
        form.address.number = String::new();
        form.address.neighborhood = String::new();
        assert_eq!(form.check(), Err((FieldGroup::Address, vec!["neighborhood".to_string(), "number".to_string()])));
    }

    #[test]
    fn test_blank_email_is_absent() {
        let form: CheckoutForm = serde_json::from_value(serde_json::json!({
            "customer": { "name": "João", "phone": "11999999999", "email": "  " },
            "address": { "street": "Rua A", "number": "1", "neighborhood": "Centro" },
        }))
        .unwrap();
        assert_eq!(form.customer.email, None);
        assert_eq!(form.check(), Ok(()));
        assert_eq!(form.customer_snapshot().email, None);
    }

    #[test]
    fn test_malformed_email_rejected() {
        let mut form = valid_form();
        form.customer.email = Some("not-an-email".into());
        assert_eq!(form.check(), Err((FieldGroup::Customer, vec!["email".to_string()])));
    }

    #[test]
    fn test_missing_keys_reported_by_group() {
        let form: CheckoutForm = serde_json::from_value(serde_json::json!({
            "customer": { "name": "João" },
        }))
        .unwrap();
        assert_eq!(form.check(), Err((FieldGroup::Customer, vec!["phone".to_string()])));

        let form: CheckoutForm = serde_json::from_value(serde_json::json!({
            "customer": { "name": "João", "phone": "11999999999" },
        }))
        .unwrap();
        assert_eq!(
            form.check(),
            Err((FieldGroup::Address, vec!["neighborhood".to_string(), "number".to_string(), "street".to_string()]))
        );
    }

    #[test]
    fn test_optional_fields_trimmed() {
        let mut form = valid_form();
        form.coupon_code = Some("   ".into());
        form.notes = Some(" sem cebola ".into());
        assert_eq!(form.coupon_code(), None);
        assert_eq!(form.notes().as_deref(), Some("sem cebola"));
    }
}
