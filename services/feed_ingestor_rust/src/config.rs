//! Configuration for feed_ingestor_rust

use anyhow::{anyhow, Result};
use mirrorx_core::backoff::ReconnectConfig;
use mirrorx_core::pricing::{SkewRatio, DEFAULT_SPREAD_CONSTANT};
use mirrorx_core::utils::env::{list_or, parse_or, string_or};
use std::time::Duration;

pub const DEFAULT_FEED_WS_URL: &str = "wss://fstream.binance.com/stream";

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    /// Exchange symbols, lowercase (`btcusdt`).
    pub symbols: Vec<String>,

    // Pricing
    pub spread_constant: f64,
    pub initial_skew: f64,

    // Connection
    pub connect_timeout: Duration,
    /// Reconnect if no frame arrives for this long.
    pub idle_timeout: Duration,
    pub reconnect: ReconnectConfig,

    // Monitoring
    pub stats_interval: Duration,
}

impl FeedConfig {
    pub fn from_env() -> Result<Self> {
        let symbols: Vec<String> = list_or("FEED_SYMBOLS", "btcusdt")
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        if symbols.is_empty() {
            return Err(anyhow!("FEED_SYMBOLS must name at least one symbol"));
        }

        let spread_constant = parse_or("FEED_SPREAD_CONSTANT", DEFAULT_SPREAD_CONSTANT)?;
        if !spread_constant.is_finite() || spread_constant < 0.0 {
            return Err(anyhow!("FEED_SPREAD_CONSTANT must be a finite value >= 0"));
        }

        let initial_skew = parse_or("FEED_SKEW_RATIO", SkewRatio::DEFAULT)?;
        SkewRatio::new(initial_skew).map_err(|e| anyhow!("FEED_SKEW_RATIO: {}", e))?;

        let idle_timeout_secs: u64 = parse_or("FEED_IDLE_TIMEOUT_SECS", 30)?;
        if idle_timeout_secs == 0 {
            return Err(anyhow!("FEED_IDLE_TIMEOUT_SECS must be > 0"));
        }

        Ok(Self {
            ws_url: string_or("FEED_WS_URL", DEFAULT_FEED_WS_URL),
            symbols,
            spread_constant,
            initial_skew,
            connect_timeout: Duration::from_secs(parse_or("FEED_CONNECT_TIMEOUT_SECS", 10)?),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            reconnect: ReconnectConfig::from_env("FEED"),
            stats_interval: Duration::from_secs(parse_or("FEED_STATS_INTERVAL_SECS", 60)?),
        })
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_FEED_WS_URL.to_string(),
            symbols: vec!["btcusdt".to_string()],
            spread_constant: DEFAULT_SPREAD_CONSTANT,
            initial_skew: SkewRatio::DEFAULT,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            stats_interval: Duration::from_secs(60),
        }
    }
}
