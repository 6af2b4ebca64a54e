//! Cart Aggregate

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{Customization, Money, Quantity};

/// Product details captured when the line was added, never live-joined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub unit_price: Money,
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub snapshot: ProductSnapshot,
    pub quantity: Quantity,
    pub customization: Customization,
}

impl CartLine {
    pub fn line_total(&self) -> Money { self.snapshot.unit_price.multiply(self.quantity) }

    /// Lines merge only when both product and customization match.
    pub fn is_configuration(&self, product_id: Uuid, customization: &Customization) -> bool {
        self.product_id == product_id && &self.customization == customization
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    /// Builds a cart from stored rows, summing duplicate configurations.
    /// The first row's snapshot is kept for a merged line.
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Self {
        let mut cart = Self::new();
        for line in lines { cart.add(line); }
        cart
    }

    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn into_lines(self) -> Vec<CartLine> { self.lines }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn line_count(&self) -> usize { self.lines.len() }
    pub fn item_count(&self) -> u32 { self.lines.iter().map(|l| l.quantity.value()).sum() }
    pub fn subtotal(&self) -> Money { self.lines.iter().map(CartLine::line_total).sum() }

    pub fn quantity_of(&self, product_id: Uuid, customization: &Customization) -> u32 {
        self.find(product_id, customization).map_or(0, |i| self.lines[i].quantity.value())
    }

    pub fn add(&mut self, line: CartLine) {
        match self.find(line.product_id, &line.customization) {
            Some(i) => {
                let existing = &mut self.lines[i];
                existing.quantity = existing.quantity.add(line.quantity);
            }
            None => self.lines.push(line),
        }
    }

    /// Takes one unit off a line, deleting the line instead of leaving it at zero.
    pub fn remove_one(&mut self, product_id: Uuid, customization: &Customization) -> Result<(), CartError> {
        let i = self.find(product_id, customization).ok_or(CartError::LineNotFound)?;
        match self.lines[i].quantity.subtract(1) {
            Some(quantity) => self.lines[i].quantity = quantity,
            None => { self.lines.remove(i); }
        }
        Ok(())
    }

    /// Sets an absolute quantity; zero deletes the line.
    pub fn set_quantity(&mut self, product_id: Uuid, customization: &Customization, quantity: u32) -> Result<(), CartError> {
        let i = self.find(product_id, customization).ok_or(CartError::LineNotFound)?;
        match Quantity::new(quantity) {
            Some(quantity) => self.lines[i].quantity = quantity,
            None => { self.lines.remove(i); }
        }
        Ok(())
    }

    pub fn remove_line(&mut self, product_id: Uuid, customization: &Customization) -> Result<(), CartError> {
        let i = self.find(product_id, customization).ok_or(CartError::LineNotFound)?;
        self.lines.remove(i);
        Ok(())
    }

    pub fn clear(&mut self) { self.lines.clear(); }

    fn find(&self, product_id: Uuid, customization: &Customization) -> Option<usize> {
        self.lines.iter().position(|l| l.is_configuration(product_id, customization))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("cart line not found")]
    LineNotFound,
    #[error("quantity must be at least 1")]
    InvalidQuantity,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burger(customization: Customization, qty: u32) -> CartLine {
        CartLine {
            product_id: Uuid::from_u128(1),
            snapshot: ProductSnapshot { name: "Burger".into(), unit_price: Money::from_cents(2590), image_url: None },
            quantity: Quantity::new(qty).unwrap(),
            customization,
        }
    }

    fn no_cheese() -> Customization { Customization::new(None, vec!["no-cheese".to_string()]) }

    #[test]
    fn test_add_and_remove_sequence() {
        let mut cart = Cart::new();
        let id = Uuid::from_u128(1);
        let plain = Customization::default();
        let steps = [true, true, false, true, false, false, false, true];
        let mut expected: u32 = 0;
        for add in steps {
            if add {
                cart.add(burger(plain.clone(), 1));
                expected += 1;
            } else {
                let result = cart.remove_one(id, &plain);
                if expected == 0 { assert_eq!(result, Err(CartError::LineNotFound)); }
                expected = expected.saturating_sub(1);
            }
            assert_eq!(cart.quantity_of(id, &plain), expected);
            assert!(cart.lines().iter().all(|l| l.quantity.value() >= 1));
            assert_eq!(cart.line_count(), usize::from(expected > 0));
        }
    }

    #[test]
    fn test_customizations_stay_distinct() {
        let mut cart = Cart::new();
        cart.add(burger(Customization::default(), 1));
        cart.add(burger(no_cheese(), 1));
        assert_eq!(cart.line_count(), 2);
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.subtotal(), Money::from_cents(5180));
    }

    #[test]
    fn test_from_lines_sums_duplicates() {
        let cart = Cart::from_lines(vec![burger(no_cheese(), 1), burger(no_cheese(), 2)]);
        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.quantity_of(Uuid::from_u128(1), &no_cheese()), 3);
    }

    #[test]
    fn test_set_quantity_zero_deletes() {
        let mut cart = Cart::from_lines(vec![burger(no_cheese(), 4)]);
        cart.set_quantity(Uuid::from_u128(1), &no_cheese(), 2).unwrap();
        assert_eq!(cart.item_count(), 2);
        cart.set_quantity(Uuid::from_u128(1), &no_cheese(), 0).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.remove_line(Uuid::from_u128(1), &no_cheese()), Err(CartError::LineNotFound));
    }
}
