//! Configuration for order_intake_rust

use anyhow::{anyhow, Context, Result};
use mirrorx_core::backoff::ReconnectConfig;
use mirrorx_core::redis::stream::{
    RetentionPolicy, DEFAULT_ENTRY_BYTES, DEFAULT_MAX_BYTES, DEFAULT_ORDER_STREAM,
};
use mirrorx_core::utils::env::{env_parse, list_or, parse_or, string_or};
use std::net::SocketAddr;
use std::time::Duration;

use crate::intake::EnqueueRetry;

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub bind_addr: SocketAddr,
    pub tradable_symbols: Vec<String>,

    // Order stream
    pub stream_key: String,
    pub retention: RetentionPolicy,
    pub enqueue_timeout: Duration,
    pub enqueue_retry: EnqueueRetry,
}

impl IntakeConfig {
    pub fn from_env() -> Result<Self> {
        let raw_addr = string_or("INTAKE_BIND_ADDR", "0.0.0.0:8000");
        let bind_addr = raw_addr
            .parse()
            .with_context(|| format!("INTAKE_BIND_ADDR is not a socket address: {}", raw_addr))?;

        let tradable_symbols = list_or("INTAKE_TRADABLE_SYMBOLS", "BTC");
        if tradable_symbols.is_empty() {
            return Err(anyhow!("INTAKE_TRADABLE_SYMBOLS must name at least one symbol"));
        }

        // Age-based retention wins when configured.
        let retention = match env_parse::<u64>("ORDER_QUEUE_MAX_AGE_SECS") {
            Some(0) => return Err(anyhow!("ORDER_QUEUE_MAX_AGE_SECS must be > 0")),
            Some(secs) => RetentionPolicy::MaxAge(Duration::from_secs(secs)),
            None => {
                let max_bytes = parse_or("ORDER_QUEUE_MAX_BYTES", DEFAULT_MAX_BYTES)?;
                let entry_bytes = parse_or("ORDER_QUEUE_ENTRY_BYTES", DEFAULT_ENTRY_BYTES)?;
                if max_bytes == 0 || entry_bytes == 0 {
                    return Err(anyhow!("ORDER_QUEUE_MAX_BYTES and ORDER_QUEUE_ENTRY_BYTES must be > 0"));
                }
                RetentionPolicy::from_bytes(max_bytes, entry_bytes)
            }
        };

        let defaults = EnqueueRetry::default();
        let max_attempts = parse_or("ORDER_QUEUE_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(anyhow!("ORDER_QUEUE_MAX_ATTEMPTS must be >= 1"));
        }
        let enqueue_retry = EnqueueRetry {
            max_attempts,
            backoff: ReconnectConfig {
                base_delay_ms: parse_or("ORDER_QUEUE_RETRY_BASE_MS", defaults.backoff.base_delay_ms)?,
                max_delay_ms: parse_or("ORDER_QUEUE_RETRY_MAX_MS", defaults.backoff.max_delay_ms)?,
                ..defaults.backoff
            },
            budget: Duration::from_millis(parse_or(
                "ORDER_QUEUE_BUDGET_MS",
                defaults.budget.as_millis() as u64,
            )?),
        };

        Ok(Self {
            bind_addr,
            tradable_symbols,
            stream_key: string_or("ORDER_STREAM_KEY", DEFAULT_ORDER_STREAM),
            retention,
            enqueue_timeout: Duration::from_millis(parse_or("ORDER_QUEUE_TIMEOUT_MS", 2000)?),
            enqueue_retry,
        })
    }
}
