//! Inventory levels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Out,
    Low,
    Ok,
}

impl StockStatus {
    pub fn needs_restock(self) -> bool { self != Self::Ok }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub quantity: u32,
    pub low_alert: u32,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    pub fn new(product_id: Uuid, quantity: u32, low_alert: u32) -> Self {
        Self { product_id, quantity, low_alert, updated_at: Utc::now() }
    }

    pub fn status(&self) -> StockStatus {
        if self.quantity == 0 { StockStatus::Out }
        else if self.quantity <= self.low_alert { StockStatus::Low }
        else { StockStatus::Ok }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_status() {
        let id = Uuid::new_v4();
        assert_eq!(StockLevel::new(id, 0, 5).status(), StockStatus::Out);
        assert_eq!(StockLevel::new(id, 5, 5).status(), StockStatus::Low);
        assert!(!StockLevel::new(id, 6, 5).status().needs_restock());
        assert!(StockLevel::new(id, 1, 5).status().needs_restock());
    }
}
