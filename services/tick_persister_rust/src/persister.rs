//! `priceUpdates` handler that appends one tick per delivered event.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mirrorx_core::broker::MessageHandler;
use mirrorx_core::db::execute_with_retry_custom;
use mirrorx_core::models::PriceUpdateEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::store::TickStore;

#[derive(Debug, Default)]
pub struct PersistStats {
    pub persisted: AtomicU64,
    pub dropped: AtomicU64,
    pub malformed: AtomicU64,
}

impl PersistStats {
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Not idempotent: a redelivered event is written again.
pub struct TickPersister {
    store: Arc<dyn TickStore>,
    retry: RetryConfig,
    stats: Arc<PersistStats>,
}

impl TickPersister {
    pub fn new(store: Arc<dyn TickStore>, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            stats: Arc::new(PersistStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<PersistStats> {
        &self.stats
    }

    async fn persist(&self, event: &PriceUpdateEvent) -> Result<()> {
        let price = event.mid_price();
        let insert_timeout = self.retry.insert_timeout;

        let time = execute_with_retry_custom(
            || {
                let store = self.store.clone();
                let symbol = event.symbol.clone();
                async move {
                    let time = tokio::time::timeout(insert_timeout, store.insert_tick(&symbol, price))
                        .await
                        .with_context(|| format!("Tick insert timed out after {:?}", insert_timeout))??;
                    Ok::<_, anyhow::Error>(time)
                }
            },
            self.retry.max_attempts,
            self.retry.base_backoff_ms,
            self.retry.max_backoff_ms,
        )
        .await?;

        debug!("Persisted {} @ {} at {}", event.symbol, price, time);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for TickPersister {
    async fn handle(&self, channel: &str, payload: &str) -> Result<()> {
        let event: PriceUpdateEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding malformed {} payload: {}", channel, e);
                return Ok(());
            }
        };
        if !event.mid_price().is_finite() {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            warn!("Discarding non-finite price for {}", event.symbol);
            return Ok(());
        }

        match self.persist(&event).await {
            Ok(()) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Dropping tick for {} after {} attempts: {:#}",
                    event.symbol, self.retry.max_attempts, e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTickStore;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            insert_timeout: Duration::from_millis(200),
            base_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_persists_midpoint() {
        let store = Arc::new(MemoryTickStore::new());
        let persister = TickPersister::new(store.clone(), fast_retry(3));

        persister
            .handle("priceUpdates", r#"{"symbol":"BTC","buy":50050,"sell":49950}"#)
            .await
            .unwrap();

        let ticks = store.ticks();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "BTC");
        assert!((ticks[0].price - 50000.0).abs() < 1e-9);
        assert_eq!(persister.stats().persisted(), 1);
    }

    #[tokio::test]
    async fn test_each_delivery_is_a_new_row() {
        let store = Arc::new(MemoryTickStore::new());
        let persister = TickPersister::new(store.clone(), fast_retry(3));
        let payload = r#"{"symbol":"BTC","buy":101,"sell":99}"#;

        persister.handle("priceUpdates", payload).await.unwrap();
        persister.handle("priceUpdates", payload).await.unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(MemoryTickStore::new());
        store.fail_next(2);
        let persister = TickPersister::new(store.clone(), fast_retry(3));

        persister
            .handle("priceUpdates", r#"{"symbol":"BTC","buy":2,"sell":2}"#)
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(persister.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn test_drops_after_max_attempts() {
        let store = Arc::new(MemoryTickStore::new());
        store.fail_next(5);
        let persister = TickPersister::new(store.clone(), fast_retry(3));

        persister
            .handle("priceUpdates", r#"{"symbol":"BTC","buy":2,"sell":2}"#)
            .await
            .unwrap();

        assert!(store.is_empty());
        assert_eq!(persister.stats().dropped(), 1);
        // Next tick is unaffected by the dropped one.
        store.fail_next(0);
        persister
            .handle("priceUpdates", r#"{"symbol":"BTC","buy":3,"sell":3}"#)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_counted_not_stored() {
        let store = Arc::new(MemoryTickStore::new());
        let persister = TickPersister::new(store.clone(), fast_retry(3));

        persister.handle("priceUpdates", "{oops").await.unwrap();
        persister
            .handle("priceUpdates", r#"{"symbol":"BTC","buy":1}"#)
            .await
            .unwrap();

        assert!(store.is_empty());
        assert_eq!(persister.stats().malformed(), 2);
    }

    struct HangingStore;

    #[async_trait]
    impl TickStore for HangingStore {
        async fn insert_tick(&self, _symbol: &str, _price: f64) -> Result<DateTime<Utc>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_insert_times_out_and_drops() {
        let persister = TickPersister::new(Arc::new(HangingStore), fast_retry(2));
        tokio::time::timeout(
            Duration::from_secs(2),
            persister.handle("priceUpdates", r#"{"symbol":"BTC","buy":1,"sell":1}"#),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(persister.stats().dropped(), 1);
    }
}
