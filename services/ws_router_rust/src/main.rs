use anyhow::{Context, Result};
use mirrorx_core::broker::Broker;
use mirrorx_core::models::channels;
use mirrorx_core::redis::RedisBus;
use mirrorx_core::telemetry::init_tracing;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use ws_router_rust::{create_app, AppState, ConnectionRouter, LiquidationHandler, PriceBroadcastHandler, RouterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing("info,tower_http=info");

    info!("Starting ws_router_rust...");

    let config = RouterConfig::from_env()?;
    let bus = RedisBus::new().await?;
    let router = Arc::new(ConnectionRouter::new(config.outbound_capacity));

    let prices = bus
        .subscribe(
            channels::PRICE_UPDATES,
            Arc::new(PriceBroadcastHandler::new(router.clone())),
        )
        .await
        .context("Failed to subscribe to price updates")?;
    let liquidations = bus
        .subscribe(
            channels::LIQUIDATIONS,
            Arc::new(LiquidationHandler::new(router.clone())),
        )
        .await
        .context("Failed to subscribe to liquidations")?;

    let app = create_app(AppState { router });
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    prices.cancel();
    liquidations.cancel();
    info!("ws_router_rust stopped");
    Ok(())
}
