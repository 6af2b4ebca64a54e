//! NATS transport for change events.
//!
//! Each table publishes on `storefront.changes.<table>` with a JSON body.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, warn};

use super::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeSink, Delivery, FeedError};

const SUBJECT_PREFIX: &str = "storefront.changes";

#[derive(Clone)]
pub struct NatsFeed {
    client: async_nats::Client,
}

impl NatsFeed {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }

    pub async fn connect(url: &str) -> Result<Self, FeedError> {
        let client = async_nats::connect(url).await.map_err(|e| FeedError::Transport(e.to_string()))?;
        Ok(Self::new(client))
    }
}

fn subject(table: &str) -> String { format!("{SUBJECT_PREFIX}.{table}") }

#[async_trait]
impl ChangeSink for NatsFeed {
    async fn publish(&self, event: ChangeEvent) -> Result<(), FeedError> {
        let payload = serde_json::to_vec(&event)?;
        self.client
            .publish(subject(&event.table), payload.into())
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        debug!(table = %event.table, id = %event.id, "Published change");
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for NatsFeed {
    async fn deliveries(&self, filter: ChangeFilter) -> Result<BoxStream<'static, Delivery>, FeedError> {
        let subscriber = self.client
            .subscribe(subject(&filter.table))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        let events = subscriber.filter_map(move |message| {
            let event = match serde_json::from_slice::<ChangeEvent>(&message.payload) {
                Ok(event) => filter.matches(&event).then_some(Delivery::Change(event)),
                Err(e) => {
                    warn!(subject = %message.subject, error = %e, "Dropping undecodable change");
                    None
                }
            };
            futures::future::ready(event)
        });
        Ok(events.boxed())
    }
}
