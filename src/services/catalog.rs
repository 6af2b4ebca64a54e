//! Categories, products and inventory.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{CatalogError, Category, Product, ProductDraft, StockLevel, StockStatus};
use crate::store::{bounded, CatalogStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InventoryItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub low_alert: u32,
    pub status: StockStatus,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    timeout: Duration,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>, timeout: Duration) -> Self { Self { store, timeout } }

    pub async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        Ok(bounded("catalog.categories", self.timeout, self.store.categories()).await?)
    }

    pub async fn create_category(&self, name: &str) -> Result<Category, CatalogError> {
        if name.trim().is_empty() {
            return Err(CatalogError::Invalid("category name is required".into()));
        }
        let category = Category::create(name);
        bounded("catalog.insert_category", self.timeout, self.store.insert_category(&category)).await?;
        info!(category = %category.name, "Created category");
        Ok(category)
    }

    /// Active products, optionally limited to one category.
    pub async fn menu(&self, category: Option<Uuid>) -> Result<Vec<Product>, CatalogError> {
        Ok(bounded("catalog.products", self.timeout, self.store.products(category, false)).await?)
    }

    pub async fn product(&self, product_id: Uuid) -> Result<Product, CatalogError> {
        bounded("catalog.product", self.timeout, self.store.product(product_id)).await?.ok_or(CatalogError::NotFound)
    }

    /// Like [`CatalogService::product`] but hides deactivated products.
    pub async fn available_product(&self, product_id: Uuid) -> Result<Product, CatalogError> {
        let product = self.product(product_id).await?;
        if product.active { Ok(product) } else { Err(CatalogError::NotFound) }
    }

    pub async fn create_product(&self, draft: ProductDraft) -> Result<Product, CatalogError> {
        let product = Product::create(draft)?;
        self.save(&product).await?;
        info!(product_id = %product.id, name = %product.name, "Created product");
        Ok(product)
    }

    pub async fn update_product(&self, product_id: Uuid, draft: ProductDraft) -> Result<Product, CatalogError> {
        let mut product = self.product(product_id).await?;
        product.update(draft)?;
        self.save(&product).await?;
        Ok(product)
    }

    /// Products are never hard-deleted; past orders and carts keep their snapshots.
    pub async fn deactivate_product(&self, product_id: Uuid) -> Result<Product, CatalogError> {
        let mut product = self.product(product_id).await?;
        product.deactivate();
        self.save(&product).await?;
        info!(product_id = %product_id, "Deactivated product");
        Ok(product)
    }

    async fn save(&self, product: &Product) -> Result<(), CatalogError> {
        Ok(bounded("catalog.save_product", self.timeout, self.store.save_product(product)).await?)
    }

    /// Every product, with products lacking a stock row reported as out of stock.
    pub async fn inventory(&self) -> Result<Vec<InventoryItem>, CatalogError> {
        let products = bounded("catalog.products", self.timeout, self.store.products(None, true)).await?;
        let levels: HashMap<Uuid, StockLevel> = bounded("catalog.stock_levels", self.timeout, self.store.stock_levels())
            .await?
            .into_iter()
            .map(|level| (level.product_id, level))
            .collect();
        Ok(products
            .into_iter()
            .map(|product| {
                let level = levels.get(&product.id).cloned().unwrap_or_else(|| StockLevel::new(product.id, 0, 0));
                InventoryItem {
                    product_id: product.id,
                    product_name: product.name,
                    quantity: level.quantity,
                    low_alert: level.low_alert,
                    status: level.status(),
                }
            })
            .collect())
    }

    pub async fn low_stock(&self) -> Result<Vec<InventoryItem>, CatalogError> {
        let mut items = self.inventory().await?;
        items.retain(|item| item.status.needs_restock());
        Ok(items)
    }

    pub async fn set_stock(&self, product_id: Uuid, quantity: u32, low_alert: u32) -> Result<StockLevel, CatalogError> {
        self.product(product_id).await?;
        let level = StockLevel::new(product_id, quantity, low_alert);
        bounded("catalog.set_stock", self.timeout, self.store.set_stock(&level)).await?;
        Ok(level)
    }
}
