//! Reconnect backoff shared by the Redis subscriber and the feed client.

use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::utils::env::env_parse;

/// Configuration for reconnection behavior
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Maximum consecutive failures before circuit breaker opens (default: 10)
    pub max_consecutive_failures: u32,
    /// Base delay in milliseconds for exponential backoff (default: 1000ms)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default: 60000ms = 1 minute)
    pub max_delay_ms: u64,
    /// Jitter percentage to prevent thundering herd (default: 0.1 = ±10%)
    pub jitter_pct: f64,
    /// Pause once the circuit breaker opens (default: 60s)
    pub cool_off: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60000,
            jitter_pct: 0.1,
            cool_off: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// Load from `{PREFIX}_RECONNECT_*` environment variables, e.g.
    /// `REDIS_RECONNECT_BASE_DELAY_MS` or `FEED_RECONNECT_MAX_FAILURES`.
    pub fn from_env(prefix: &str) -> Self {
        let defaults = Self::default();
        let var = |name: &str| format!("{}_RECONNECT_{}", prefix, name);
        Self {
            max_consecutive_failures: env_parse(&var("MAX_FAILURES"))
                .unwrap_or(defaults.max_consecutive_failures),
            base_delay_ms: env_parse(&var("BASE_DELAY_MS")).unwrap_or(defaults.base_delay_ms),
            max_delay_ms: env_parse(&var("MAX_DELAY_MS")).unwrap_or(defaults.max_delay_ms),
            jitter_pct: env_parse(&var("JITTER_PCT")).unwrap_or(defaults.jitter_pct),
            cool_off: env_parse(&var("COOL_OFF_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.cool_off),
        }
    }

    /// Calculate exponential backoff delay with jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay_ms as f64;
        let exponential_ms = base_ms * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped_ms = exponential_ms.min(self.max_delay_ms as f64);

        // Add jitter: ±jitter_pct%
        let jitter_range = capped_ms * self.jitter_pct;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped_ms + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }

    /// A session that stayed up for at least the longest backoff delay is
    /// treated as healthy even if it carried no traffic.
    pub fn is_stable_session(&self, lasted: Duration) -> bool {
        lasted >= Duration::from_millis(self.max_delay_ms)
    }

    /// Whether the breaker should open given the current failure streak.
    pub fn should_pause(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_consecutive_failures
    }
}

/// Run `f` up to `max_attempts` times, sleeping `config.calculate_delay`
/// between failures. Returns the last error once attempts run out.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &ReconnectConfig,
    max_attempts: u32,
    what: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = config.calculate_delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                    what, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Statistics for monitoring reconnection behavior
#[derive(Debug, Default)]
pub struct ReconnectStats {
    /// Total reconnection attempts
    pub reconnect_attempts: AtomicU64,
    /// Successful reconnections
    pub successful_reconnects: AtomicU64,
    /// Failed reconnection attempts
    pub failed_reconnects: AtomicU64,
    /// Current consecutive failures
    pub consecutive_failures: AtomicU32,
}

impl ReconnectStats {
    pub fn record_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_reconnects.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Count a reconnect without clearing the failure streak. The caller
    /// resets the streak once the new session has proven healthy.
    pub fn record_connected(&self) {
        self.successful_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_reconnects.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}
