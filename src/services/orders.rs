//! Admin order handling: listing, status progression and reports.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderDetails, OrderError, OrderStatus};
use crate::domain::reports::{CustomerFilter, CustomerReport, ReportFilter, SalesReport};
use crate::realtime::{ChangeEvent, ChangeSink, OrderSource};
use crate::store::{bounded, OrderStore};

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    changes: Arc<dyn ChangeSink>,
    timeout: Duration,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, changes: Arc<dyn ChangeSink>, timeout: Duration) -> Self {
        Self { store, changes, timeout }
    }

    pub async fn list(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, OrderError> {
        Ok(bounded("orders.list", self.timeout, self.store.list(status)).await?)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<OrderDetails, OrderError> {
        bounded("orders.get", self.timeout, self.store.get(order_id)).await?.ok_or(OrderError::NotFound)
    }

    /// Moves the order one step forward. The store write is conditional on
    /// the status read here, so two concurrent advances cannot skip a step.
    pub async fn advance(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let mut order = self.get(order_id).await?.order;
        let previous = order.advance()?;
        bounded("orders.update_status", self.timeout, self.store.update_status(order_id, previous, order.status(), order.updated_at))
            .await
            .map_err(|e| {
                warn!(order_id = %order_id, error = %e, "Status update rejected");
                e
            })?;
        info!(order_id = %order_id, from = %previous, to = %order.status(), "Order advanced");

        match ChangeEvent::update("orders", order.id, &order) {
            Ok(event) => {
                if let Err(e) = self.changes.publish(event).await {
                    warn!(order_id = %order_id, error = %e, "Order change not published");
                }
            }
            Err(e) => warn!(order_id = %order_id, error = %e, "Order change not encoded"),
        }
        Ok(order)
    }

    pub async fn sales_report(&self, filter: &ReportFilter) -> Result<SalesReport, OrderError> {
        let orders = self.list(None).await?;
        Ok(SalesReport::build(&orders, filter))
    }

    pub async fn customers(&self, filter: &CustomerFilter) -> Result<CustomerReport, OrderError> {
        let orders = self.list(None).await?;
        Ok(CustomerReport::build(&orders, filter))
    }
}

#[async_trait]
impl OrderSource for OrderService {
    async fn current_orders(&self) -> Result<Vec<Order>, OrderError> { self.list(None).await }
}
