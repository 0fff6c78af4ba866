//! Database connection health monitoring

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info};

use crate::utils::env::env_parse;

/// `SELECT 1` against the pool.
pub async fn check_pool_health(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Database health check failed")?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct PoolHealthConfig {
    pub check_interval: Duration,
    /// Consecutive failures before logging at critical level
    pub alert_threshold: u32,
    pub enabled: bool,
}

impl Default for PoolHealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            alert_threshold: 3,
            enabled: true,
        }
    }
}

impl PoolHealthConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            check_interval: env_parse("DB_HEALTH_CHECK_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.check_interval),
            alert_threshold: env_parse("DB_HEALTH_ALERT_THRESHOLD").unwrap_or(defaults.alert_threshold),
            enabled: env_parse("DB_HEALTH_CHECK_ENABLED").unwrap_or(defaults.enabled),
        }
    }
}

/// Periodically probes the pool and logs outages and recoveries.
pub struct PoolHealthMonitor {
    pool: PgPool,
    config: PoolHealthConfig,
}

impl PoolHealthMonitor {
    pub fn new(pool: PgPool, config: PoolHealthConfig) -> Self {
        Self { pool, config }
    }

    /// Start monitoring loop (runs forever)
    pub async fn start_monitoring(self) {
        if !self.config.enabled {
            info!("Database health monitoring is disabled");
            return;
        }

        info!(
            "Starting database health monitoring (interval: {:?}, alert threshold: {})",
            self.config.check_interval, self.config.alert_threshold
        );

        let mut consecutive_failures = 0u32;

        loop {
            tokio::time::sleep(self.config.check_interval).await;

            match check_pool_health(&self.pool).await {
                Ok(_) => {
                    if consecutive_failures > 0 {
                        info!(
                            "Database connection recovered after {} failures",
                            consecutive_failures
                        );
                        consecutive_failures = 0;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        "Database health check failed (attempt {}/{}): {:#} (pool size={}, idle={})",
                        consecutive_failures,
                        self.config.alert_threshold,
                        e,
                        self.pool.size(),
                        self.pool.num_idle()
                    );

                    if consecutive_failures == self.config.alert_threshold {
                        error!(
                            "CRITICAL: Database health check failed {} times in a row; ticks are being dropped",
                            consecutive_failures
                        );
                    }
                }
            }
        }
    }

    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.start_monitoring())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_config_defaults() {
        let config = PoolHealthConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.alert_threshold, 3);
        assert!(config.enabled);
    }
}
