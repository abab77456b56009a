//! Prediction-market surveillance engine entrypoint (§4.12).
//!
//! Wires config, storage, REST client, subscription client, and the stream
//! processor together, then waits on Ctrl-C for a graceful shutdown.

use anyhow::{Context, Result};
use surveillance_engine::{Config, StreamProcessor};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    tracing::info!(
        data_dir = %config.data_dir,
        realtime_enabled = config.realtime.enabled,
        "starting surveillance engine"
    );

    let storage = Arc::new(
        surveillance_engine::storage::Storage::load(config.data_dir.clone())
            .await
            .context("failed to load storage")?,
    );

    let rest_client = Arc::new(
        surveillance_engine::rest_client::RestClient::new(
            config.polymarket.base_url.clone(),
            config.clob_rate_limits.clone(),
        )
        .context("failed to build REST client")?,
    );

    let (subscription, event_rx) = surveillance_engine::subscription::SubscriptionClient::spawn(
        config.polymarket.ws_url.clone(),
        config.realtime.clone(),
    );

    let processor = StreamProcessor::new(config, storage, rest_client, subscription.clone());
    processor.start(event_rx);

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl_c")?;
    tracing::info!("shutdown signal received, stopping stream processor");
    processor.stop();
    subscription.shutdown();

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surveillance_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
