//! Storefront - food-ordering storefront and admin console backend

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use storefront::{
    http::{self, AppState},
    realtime::{ChangeFeed, ChangeFilter, ChangeSink, InProcessFeed, NatsFeed},
    services::Stores,
    store::{MemoryStore, PgStore},
    Config,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let stores = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Stores::shared(Arc::new(PgStore::new(db)))
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            Stores::shared(Arc::new(MemoryStore::new()))
        }
    };

    let (changes, feed): (Arc<dyn ChangeSink>, Arc<dyn ChangeFeed>) = match &config.nats_url {
        Some(url) => {
            let nats = Arc::new(NatsFeed::connect(url).await?);
            (nats.clone() as Arc<dyn ChangeSink>, nats as Arc<dyn ChangeFeed>)
        }
        None => {
            let local = Arc::new(InProcessFeed::default());
            (local.clone() as Arc<dyn ChangeSink>, local as Arc<dyn ChangeFeed>)
        }
    };

    let state = AppState::new(stores, changes, &config);
    let _board_feed = state.board.follow(feed.as_ref(), ChangeFilter::table("orders"), Arc::new(state.orders.clone())).await?;

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, currency = %config.currency, "Storefront listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Shutdown signal handler failed");
    }
    info!("Shutting down");
}
