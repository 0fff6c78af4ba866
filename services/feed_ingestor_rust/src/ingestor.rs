//! Turns feed frames into quoted `priceUpdates` events.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mirrorx_core::broker::{publish_json, Broker, MessageHandler};
use mirrorx_core::models::{channels, PriceUpdateEvent, SkewUpdate};
use mirrorx_core::pricing::{quote, SkewRatio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::message::{base_asset, parse_frame, FeedFrame};

#[derive(Debug, Default)]
pub struct IngestStats {
    pub frames_received: AtomicU64,
    pub parse_failures: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub frames_received: u64,
    pub parse_failures: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub reconnects: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

pub struct FeedIngestor {
    broker: Arc<dyn Broker>,
    skew: Arc<SkewRatio>,
    spread_constant: f64,
    stats: Arc<IngestStats>,
}

impl FeedIngestor {
    pub fn new(broker: Arc<dyn Broker>, skew: Arc<SkewRatio>, spread_constant: f64) -> Self {
        Self {
            broker,
            skew,
            spread_constant,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Process one text frame. Returns the published event, if any.
    ///
    /// Bad frames and publish failures are logged and counted; neither is
    /// ever surfaced to the read loop.
    pub async fn handle_text(&self, text: &str) -> Option<PriceUpdateEvent> {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        let mark = match parse_frame(text) {
            Ok(FeedFrame::MarkPrice(mark)) => mark,
            Ok(FeedFrame::SubscriptionAck { id }) => {
                debug!("Subscription {} acknowledged", id);
                return None;
            }
            Err(e) => {
                self.stats.parse_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding feed frame: {}", e);
                return None;
            }
        };

        let quoted = quote(mark.price, self.skew.get(), self.spread_constant);
        let event = PriceUpdateEvent {
            symbol: base_asset(&mark.symbol),
            buy: quoted.buy,
            sell: quoted.sell,
        };

        match publish_json(self.broker.as_ref(), channels::PRICE_UPDATES, &event).await {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "{} mark={} buy={:.4} sell={:.4}",
                    event.symbol, mark.price, event.buy, event.sell
                );
                Some(event)
            }
            Err(e) => {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to publish price update for {}: {:#}", event.symbol, e);
                None
            }
        }
    }
}

/// Applies `skewUpdates` messages to the shared ratio.
pub struct SkewUpdateHandler {
    skew: Arc<SkewRatio>,
}

impl SkewUpdateHandler {
    pub fn new(skew: Arc<SkewRatio>) -> Self {
        Self { skew }
    }
}

#[async_trait]
impl MessageHandler for SkewUpdateHandler {
    async fn handle(&self, _channel: &str, payload: &str) -> Result<()> {
        let update: SkewUpdate =
            serde_json::from_str(payload).context("Malformed skew update")?;
        let previous = self.skew.set(update.ratio)?;
        info!("Skew ratio updated: {} -> {}", previous, update.ratio);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorx_core::broker::{InProcessBroker, Subscription};
    use std::time::Duration;

    const FRAME: &str = r#"{"stream":"btcusdt@markPrice","data":{"e":"markPriceUpdate","E":1,"s":"BTCUSDT","p":"50000"}}"#;

    async fn setup(ratio: f64) -> (FeedIngestor, Subscription, Arc<SkewRatio>) {
        let broker = InProcessBroker::new();
        let sub = broker.open_subscription(channels::PRICE_UPDATES).await.unwrap();
        let skew = Arc::new(SkewRatio::new(ratio).unwrap());
        let ingestor = FeedIngestor::new(Arc::new(broker), skew.clone(), 0.001);
        (ingestor, sub, skew)
    }

    async fn next_event(sub: &mut Subscription) -> PriceUpdateEvent {
        let raw = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_mark_price_is_quoted_and_published() {
        let (ingestor, mut sub, _) = setup(1.0).await;

        let returned = ingestor.handle_text(FRAME).await.unwrap();
        let event = next_event(&mut sub).await;

        assert_eq!(returned, event);
        assert_eq!(event.symbol, "BTC");
        assert!((event.buy - 50050.0).abs() < 1e-6);
        assert!((event.sell - 49950.0).abs() < 1e-6);
        assert_eq!(ingestor.stats().snapshot().published, 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_block_next_frame() {
        let (ingestor, mut sub, _) = setup(1.0).await;

        assert!(ingestor.handle_text("{\"stream\":").await.is_none());
        assert!(ingestor.handle_text(FRAME).await.is_some());

        let event = next_event(&mut sub).await;
        assert_eq!(event.symbol, "BTC");
        let stats = ingestor.stats().snapshot();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(stats.published, 1);
    }

    #[tokio::test]
    async fn test_subscription_ack_is_skipped_silently() {
        let (ingestor, _sub, _) = setup(1.0).await;
        assert!(ingestor.handle_text(r#"{"result":null,"id":1}"#).await.is_none());
        let stats = ingestor.stats().snapshot();
        assert_eq!(stats.parse_failures, 0);
        assert_eq!(stats.published, 0);
    }

    #[tokio::test]
    async fn test_skew_update_changes_following_quotes() {
        let (ingestor, mut sub, skew) = setup(1.0).await;
        let handler = SkewUpdateHandler::new(skew.clone());

        handler.handle(channels::SKEW_UPDATES, r#"{"ratio":1.5}"#).await.unwrap();
        assert!(handler.handle(channels::SKEW_UPDATES, r#"{"ratio":-1}"#).await.is_err());
        assert!(handler.handle(channels::SKEW_UPDATES, "garbage").await.is_err());
        assert_eq!(skew.get(), 1.5);

        ingestor.handle_text(FRAME).await.unwrap();
        let event = next_event(&mut sub).await;
        assert!((event.buy - 50075.0).abs() < 1e-6);
        assert!((event.sell - 49925.0).abs() < 1e-6);
    }
}
