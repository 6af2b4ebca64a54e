//! Live view of orders for the admin console.

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, Delivery, FeedError, Subscription};
use crate::domain::aggregates::{Order, OrderError};

const RELOAD_BACKOFF: Duration = Duration::from_secs(1);

/// Where the board loads the full set of orders from.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn current_orders(&self) -> Result<Vec<Order>, OrderError>;
}

/// Orders keyed by id. Inserts and updates replace the whole record, so the
/// board converges regardless of delivery order per id.
#[derive(Clone, Default)]
pub struct OrderBoard {
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
}

impl OrderBoard {
    pub fn new() -> Self { Self::default() }

    /// Replaces the board's contents with what `source` holds now.
    pub async fn reload(&self, source: &dyn OrderSource) -> Result<usize, OrderError> {
        let orders = source.current_orders().await?;
        let mut board = self.orders.write().await;
        board.clear();
        board.extend(orders.into_iter().map(|order| (order.id, order)));
        Ok(board.len())
    }

    /// Returns whether the event changed the board.
    pub async fn apply(&self, event: &ChangeEvent) -> bool {
        match event.kind {
            ChangeKind::Delete => self.orders.write().await.remove(&event.id).is_some(),
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(record) = &event.record else {
                    warn!(id = %event.id, "Order change without a record");
                    return false;
                };
                match serde_json::from_value::<Order>(record.clone()) {
                    Ok(order) => {
                        self.orders.write().await.insert(event.id, order);
                        true
                    }
                    Err(e) => {
                        warn!(id = %event.id, error = %e, "Ignoring malformed order change");
                        false
                    }
                }
            }
        }
    }

    /// Subscribes first and loads from `source` second, so a change committed
    /// during the load waits in the subscription and is applied afterwards.
    /// When the feed reports lost changes the board reloads from `source`
    /// once the backlog it already has is drained. Runs until the handle is
    /// dropped.
    pub async fn follow(&self, feed: &dyn ChangeFeed, filter: ChangeFilter, source: Arc<dyn OrderSource>) -> Result<Subscription, FeedError> {
        let mut deliveries = feed.deliveries(filter).await?;
        let loaded = self.reload(source.as_ref()).await?;
        debug!(loaded, "Order board loaded");

        let board = self.clone();
        let task = tokio::spawn(async move {
            let mut behind = false;
            loop {
                let next = if behind {
                    match deliveries.next().now_or_never() {
                        Some(next) => next,
                        None => {
                            match board.reload(source.as_ref()).await {
                                Ok(loaded) => {
                                    info!(loaded, "Order board reloaded after missed changes");
                                    behind = false;
                                }
                                Err(e) => {
                                    warn!(error = %e, "Order board reload failed");
                                    tokio::time::sleep(RELOAD_BACKOFF).await;
                                }
                            }
                            continue;
                        }
                    }
                } else {
                    deliveries.next().await
                };
                match next {
                    Some(Delivery::Change(event)) => {
                        board.apply(&event).await;
                    }
                    Some(Delivery::Lagged { skipped }) => {
                        warn!(skipped, "Order board missed changes");
                        behind = true;
                    }
                    None => break,
                }
            }
            debug!("Order feed ended");
        });
        Ok(Subscription::new(task))
    }

    pub async fn get(&self, id: Uuid) -> Option<Order> { self.orders.read().await.get(&id).cloned() }

    pub async fn len(&self) -> usize { self.orders.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.orders.read().await.is_empty() }

    /// Newest first.
    pub async fn snapshot(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }
}
