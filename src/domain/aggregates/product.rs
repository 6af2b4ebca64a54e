//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};
use crate::domain::aggregates::cart::{CartLine, ProductSnapshot};
use crate::domain::value_objects::{Customization, Money, Quantity};
use crate::store::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn create(name: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into().trim().to_string(), created_at: Utc::now() }
    }
}

/// A size or flavour that replaces the base price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation { pub id: String, pub name: String, pub price: Money }

/// An add-on whose price is added on top.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Additional { pub id: String, pub name: String, pub price: Money }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Money,
    pub image_url: Option<String>,
    pub active: bool,
    pub variations: Vec<Variation>,
    pub additionals: Vec<Additional>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload from the admin console.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ProductDraft {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    #[validate(custom = "validate_price")]
    pub base_price: Money,
    pub image_url: Option<String>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub additionals: Vec<Additional>,
}

fn validate_price(price: &Money) -> Result<(), ValidationError> {
    if price.is_negative() { Err(ValidationError::new("negative_price")) } else { Ok(()) }
}

impl ProductDraft {
    fn check(&self) -> Result<(), CatalogError> {
        self.validate().map_err(|e| CatalogError::Invalid(e.to_string()))?;
        let negative = self.variations.iter().map(|v| v.price).chain(self.additionals.iter().map(|a| a.price)).any(|p| p.is_negative());
        if negative { return Err(CatalogError::Invalid("option prices must not be negative".into())); }
        Ok(())
    }
}

impl Product {
    pub fn create(draft: ProductDraft) -> Result<Self, CatalogError> {
        draft.check()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            category_id: draft.category_id,
            name: draft.name,
            description: draft.description,
            base_price: draft.base_price,
            image_url: draft.image_url,
            active: true,
            variations: draft.variations,
            additionals: draft.additionals,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update(&mut self, draft: ProductDraft) -> Result<(), CatalogError> {
        draft.check()?;
        self.category_id = draft.category_id;
        self.name = draft.name;
        self.description = draft.description;
        self.base_price = draft.base_price;
        self.image_url = draft.image_url;
        self.variations = draft.variations;
        self.additionals = draft.additionals;
        self.touch();
        Ok(())
    }

    pub fn deactivate(&mut self) { self.active = false; self.touch(); }

    /// Resolves a selection into its customization payload and price snapshot.
    ///
    /// The unit price is the variation price (or the base price) plus every
    /// selected add-on; the name reads `Name - Variation + Add1, Add2`.
    pub fn configure(&self, variation_id: Option<&str>, additional_ids: &[String]) -> Result<(Customization, ProductSnapshot), CatalogError> {
        if !self.active { return Err(CatalogError::Inactive); }
        let customization = Customization::new(variation_id.map(str::to_string), additional_ids.iter().cloned());

        let mut name = self.name.clone();
        let mut unit_price = self.base_price;
        if let Some(id) = customization.variation_id() {
            let variation = self.variations.iter().find(|v| v.id == id).ok_or_else(|| CatalogError::UnknownVariation(id.to_string()))?;
            unit_price = variation.price;
            name = format!("{name} - {}", variation.name);
        }

        let mut names = Vec::with_capacity(customization.additional_ids().len());
        for id in customization.additional_ids() {
            let additional = self.additionals.iter().find(|a| &a.id == id).ok_or_else(|| CatalogError::UnknownAdditional(id.clone()))?;
            unit_price = unit_price.add(additional.price);
            names.push(additional.name.as_str());
        }
        if !names.is_empty() { name = format!("{name} + {}", names.join(", ")); }

        Ok((customization, ProductSnapshot { name, unit_price, image_url: self.image_url.clone() }))
    }

    pub fn cart_line(&self, variation_id: Option<&str>, additional_ids: &[String], quantity: Quantity) -> Result<CartLine, CatalogError> {
        let (customization, snapshot) = self.configure(variation_id, additional_ids)?;
        Ok(CartLine { product_id: self.id, snapshot, quantity, customization })
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("product not found")]
    NotFound,
    #[error("product is not available")]
    Inactive,
    #[error("unknown variation: {0}")]
    UnknownVariation(String),
    #[error("unknown add-on: {0}")]
    UnknownAdditional(String),
    #[error("invalid product: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burger() -> Product {
        Product::create(ProductDraft {
            name: "Big Burger".into(),
            description: None,
            category_id: None,
            base_price: Money::from_cents(2590),
            image_url: Some("burger.jpg".into()),
            variations: vec![Variation { id: "double".into(), name: "Duplo".into(), price: Money::from_cents(3290) }],
            additionals: vec![
                Additional { id: "bacon".into(), name: "Bacon".into(), price: Money::from_cents(400) },
                Additional { id: "egg".into(), name: "Ovo".into(), price: Money::from_cents(250) },
            ],
        }).unwrap()
    }

    #[test]
    fn test_configure_prices_and_names() {
        let product = burger();
        let (plain, snapshot) = product.configure(None, &[]).unwrap();
        assert!(plain.is_plain());
        assert_eq!(snapshot.unit_price, Money::from_cents(2590));

        let (custom, snapshot) = product.configure(Some("double"), &["egg".into(), "bacon".into()]).unwrap();
        assert_eq!(custom.variation_id(), Some("double"));
        assert_eq!(snapshot.unit_price, Money::from_cents(3940));
        assert_eq!(snapshot.name, "Big Burger - Duplo + Bacon, Ovo");
    }

    #[test]
    fn test_configure_rejects_unknown_options() {
        let mut product = burger();
        assert_eq!(product.configure(Some("triple"), &[]).unwrap_err(), CatalogError::UnknownVariation("triple".into()));
        assert_eq!(product.configure(None, &["ham".into()]).unwrap_err(), CatalogError::UnknownAdditional("ham".into()));
        product.deactivate();
        assert_eq!(product.cart_line(None, &[], Quantity::ONE).unwrap_err(), CatalogError::Inactive);
    }

    #[test]
    fn test_draft_validation() {
        let mut product = burger();
        let draft = ProductDraft {
            name: String::new(),
            description: None,
            category_id: None,
            base_price: Money::from_cents(100),
            image_url: None,
            variations: vec![],
            additionals: vec![],
        };
        assert!(matches!(product.update(draft), Err(CatalogError::Invalid(_))));
        assert_eq!(product.name, "Big Burger");
    }
}
