use anyhow::{Context, Result};
use feed_ingestor_rust::{FeedClient, FeedConfig, FeedIngestor, SkewUpdateHandler};
use mirrorx_core::broker::Broker;
use mirrorx_core::models::channels;
use mirrorx_core::pricing::SkewRatio;
use mirrorx_core::redis::RedisBus;
use mirrorx_core::telemetry::init_tracing;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing("info");

    info!("Starting feed_ingestor_rust...");

    let config = FeedConfig::from_env()?;
    let broker: Arc<dyn Broker> = Arc::new(RedisBus::new().await?);

    let skew = Arc::new(SkewRatio::new(config.initial_skew)?);
    let _skew_subscription = broker
        .subscribe(
            channels::SKEW_UPDATES,
            Arc::new(SkewUpdateHandler::new(skew.clone())),
        )
        .await
        .context("Failed to subscribe to skew updates")?;

    let ingestor = Arc::new(FeedIngestor::new(broker, skew, config.spread_constant));
    let client = FeedClient::new(config, ingestor);
    let socket = client.connect().await.context("Initial feed connection failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    client.run(socket, shutdown_rx).await?;
    info!("feed_ingestor_rust stopped");
    Ok(())
}
