//! Postgres connection pooling, health checks and retry helpers.

pub mod health;
pub mod retry;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::utils::env::env_parse;

pub use health::{check_pool_health, PoolHealthConfig, PoolHealthMonitor};
pub use retry::{execute_with_retry, execute_with_retry_custom, is_retriable_error};

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Timeout for acquiring a connection
    pub acquire_timeout: Duration,
    /// How long idle connections are kept alive
    pub idle_timeout: Duration,
    /// Maximum lifetime of a connection
    pub max_lifetime: Duration,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),   // 5 minutes
            max_lifetime: Duration::from_secs(1800),  // 30 minutes
        }
    }
}

impl DbPoolConfig {
    /// Single-writer services such as the tick persister.
    pub fn low_concurrency() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            ..Default::default()
        }
    }

    /// Create config from `DB_*` environment variables with fallback to provided defaults
    pub fn from_env_with_defaults(defaults: Self) -> Self {
        Self {
            max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: env_parse("DB_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            acquire_timeout: env_parse("DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: env_parse("DB_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime: env_parse("DB_MAX_LIFETIME_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_lifetime),
        }
    }
}

/// Create a database connection pool with the given configuration.
///
/// # Example
/// ```ignore
/// let config = DbPoolConfig::low_concurrency();
/// let pool = create_pool(&database_url, &config).await?;
/// ```
pub async fn create_pool(database_url: &str, config: &DbPoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .context("Failed to create database connection pool")?;

    tracing::info!(
        "Database pool created: max={}, min={}, acquire_timeout={}s",
        config.max_connections,
        config.min_connections,
        config.acquire_timeout.as_secs()
    );

    Ok(pool)
}
