use anyhow::{Context, Result};
use mirrorx_core::broker::Broker;
use mirrorx_core::db::{check_pool_health, create_pool, DbPoolConfig, PoolHealthConfig, PoolHealthMonitor};
use mirrorx_core::models::channels;
use mirrorx_core::redis::RedisBus;
use mirrorx_core::telemetry::init_tracing;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tick_persister_rust::{PersisterConfig, PgTickStore, TickPersister};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing("info");

    info!("Starting tick_persister_rust...");

    let config = PersisterConfig::from_env()?;

    let pool_config = DbPoolConfig::from_env_with_defaults(DbPoolConfig::low_concurrency());
    let pool = create_pool(&config.database_url, &pool_config).await?;
    check_pool_health(&pool).await?;
    PoolHealthMonitor::new(pool.clone(), PoolHealthConfig::from_env()).start_background();

    let bus = RedisBus::new().await?;

    let persister = Arc::new(TickPersister::new(
        Arc::new(PgTickStore::new(pool)),
        config.retry.clone(),
    ));
    let stats = persister.stats().clone();
    let subscription = bus
        .subscribe(channels::PRICE_UPDATES, persister)
        .await
        .context("Failed to subscribe to price updates")?;

    let sub_stats = subscription.stats().clone();
    let mut ticker = tokio::time::interval(config.stats_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(
                    "Tick stats: persisted={} dropped={} malformed={} buffer_drops={}",
                    stats.persisted(),
                    stats.dropped(),
                    stats.malformed(),
                    sub_stats.dropped_full.load(Ordering::Relaxed)
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    subscription.cancel();
    info!("tick_persister_rust stopped");
    Ok(())
}
