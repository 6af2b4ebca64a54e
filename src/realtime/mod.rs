//! Row-level change notifications.
//!
//! Writers publish a [`ChangeEvent`] through a [`ChangeSink`] after a
//! successful write; readers subscribe through a [`ChangeFeed`] with a
//! [`ChangeFilter`]. Delivery order is whatever the transport gives, so
//! consumers key updates on the record id and overwrite wholesale. A
//! subscriber that falls behind is told how many changes it lost through
//! [`Delivery::Lagged`] and is expected to reload.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::domain::aggregates::OrderError;

pub mod nats;
pub mod order_board;

pub use nats::NatsFeed;
pub use order_board::{OrderBoard, OrderSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row changed. `record` is the full row after the change; deletes carry none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub id: Uuid,
    pub record: Option<Value>,
}

impl ChangeEvent {
    pub fn insert<T: Serialize>(table: &str, id: Uuid, record: &T) -> Result<Self, FeedError> {
        Ok(Self { table: table.to_string(), kind: ChangeKind::Insert, id, record: Some(serde_json::to_value(record)?) })
    }

    pub fn update<T: Serialize>(table: &str, id: Uuid, record: &T) -> Result<Self, FeedError> {
        Ok(Self { table: table.to_string(), kind: ChangeKind::Update, id, record: Some(serde_json::to_value(record)?) })
    }

    pub fn delete(table: &str, id: Uuid) -> Self {
        Self { table: table.to_string(), kind: ChangeKind::Delete, id, record: None }
    }
}

/// Table plus optional column-equality predicate on the row.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeFilter {
    pub table: String,
    pub column: Option<(String, Value)>,
}

impl ChangeFilter {
    pub fn table(table: impl Into<String>) -> Self { Self { table: table.into(), column: None } }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.column = Some((column.into(), value.into()));
        self
    }

    /// Deletes have no row to test, so they pass any column predicate.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table { return false; }
        match (&self.column, &event.record) {
            (Some((column, expected)), Some(record)) => record.get(column) == Some(expected),
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("change payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("change feed transport failed: {0}")]
    Transport(String),
    #[error("could not load current records: {0}")]
    Load(#[from] OrderError),
}

#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn publish(&self, event: ChangeEvent) -> Result<(), FeedError>;
}

/// One item of a subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    Change(ChangeEvent),
    /// The subscriber fell behind and `skipped` changes were dropped.
    Lagged { skipped: u64 },
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Changes matching `filter`, with gaps reported in-band.
    async fn deliveries(&self, filter: ChangeFilter) -> Result<BoxStream<'static, Delivery>, FeedError>;

    /// Changes only, for consumers that tolerate gaps.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<BoxStream<'static, ChangeEvent>, FeedError> {
        let deliveries = self.deliveries(filter).await?;
        Ok(deliveries
            .filter_map(|delivery| future::ready(match delivery {
                Delivery::Change(event) => Some(event),
                Delivery::Lagged { .. } => None,
            }))
            .boxed())
    }
}

/// Handle to a running subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self { Self { task } }

    pub fn is_active(&self) -> bool { !self.task.is_finished() }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.task.abort(); }
}

/// Broadcast-backed feed for single-process deployments and tests.
#[derive(Clone)]
pub struct InProcessFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl InProcessFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for InProcessFeed {
    fn default() -> Self { Self::new(256) }
}

#[async_trait]
impl ChangeSink for InProcessFeed {
    async fn publish(&self, event: ChangeEvent) -> Result<(), FeedError> {
        // No receivers is not a failure; nobody is watching.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for InProcessFeed {
    async fn deliveries(&self, filter: ChangeFilter) -> Result<BoxStream<'static, Delivery>, FeedError> {
        let receiver = self.sender.subscribe();
        let deliveries = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Delivery::Change(event), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change subscriber lagged");
                    Some((Delivery::Lagged { skipped }, receiver))
                }
                Err(RecvError::Closed) => None,
            }
        });
        Ok(deliveries
            .filter(move |delivery| future::ready(match delivery {
                Delivery::Change(event) => filter.matches(event),
                Delivery::Lagged { .. } => true,
            }))
            .boxed())
    }
}
