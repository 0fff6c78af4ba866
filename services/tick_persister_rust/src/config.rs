//! Configuration for tick_persister_rust

use anyhow::{anyhow, Result};
use mirrorx_core::utils::env::parse_or;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PersisterConfig {
    pub database_url: String,
    pub retry: RetryConfig,
    pub stats_interval: Duration,
}

/// Per-tick write policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub insert_timeout: Duration,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            insert_timeout: Duration::from_millis(2000),
            base_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

impl PersisterConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow!("DATABASE_URL must be set"))?;

        let defaults = RetryConfig::default();
        let max_attempts = parse_or("TICK_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(anyhow!("TICK_MAX_ATTEMPTS must be >= 1"));
        }
        let insert_timeout_ms: u64 = parse_or("TICK_INSERT_TIMEOUT_MS", 2000)?;
        if insert_timeout_ms == 0 {
            return Err(anyhow!("TICK_INSERT_TIMEOUT_MS must be > 0"));
        }

        Ok(Self {
            database_url,
            retry: RetryConfig {
                max_attempts,
                insert_timeout: Duration::from_millis(insert_timeout_ms),
                base_backoff_ms: parse_or("TICK_RETRY_BASE_MS", defaults.base_backoff_ms)?,
                max_backoff_ms: parse_or("TICK_RETRY_MAX_MS", defaults.max_backoff_ms)?,
            },
            stats_interval: Duration::from_secs(parse_or("TICK_STATS_INTERVAL_SECS", 60)?),
        })
    }
}
