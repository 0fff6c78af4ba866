use anyhow::{Context, Result};
use mirrorx_core::redis::{OrderStream, RedisBus};
use mirrorx_core::telemetry::init_tracing;
use order_intake_rust::{create_app, AppState, BearerPassthrough, IntakeConfig, OrderIntake};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing("info,tower_http=info");

    info!("Starting order_intake_rust...");

    let config = IntakeConfig::from_env()?;
    let bus = RedisBus::new().await?;
    let queue = OrderStream::new(
        bus.connection(),
        config.stream_key.clone(),
        config.retention,
        config.enqueue_timeout,
    );
    info!(
        "Orders go to stream {} with retention {:?}",
        config.stream_key, config.retention
    );

    let intake = Arc::new(
        OrderIntake::new(
            Arc::new(BearerPassthrough),
            Arc::new(queue),
            config.tradable_symbols.clone(),
        )
        .with_retry(config.enqueue_retry.clone()),
    );
    let app = create_app(AppState { intake });

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

    info!("order_intake_rust stopped");
    Ok(())
}
