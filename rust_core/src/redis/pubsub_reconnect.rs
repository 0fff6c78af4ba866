//! Redis PubSub with automatic reconnection and exponential backoff
//!
//! Each subscription owns a dedicated pub/sub connection. When the
//! connection drops, the background task resubscribes with backoff and a
//! circuit breaker; messages published while disconnected are lost.

use anyhow::{Context, Result};
use futures_util::stream::StreamExt;
use redis::{aio::PubSub, Client};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::backoff::{ReconnectConfig, ReconnectStats};
use crate::broker::{Offer, SubscriptionSender};

/// Redis PubSub with automatic reconnection
#[derive(Clone)]
pub struct ReconnectingPubSub {
    client: Client,
    channels: Vec<String>,
    config: ReconnectConfig,
    stats: Arc<ReconnectStats>,
}

impl ReconnectingPubSub {
    pub fn subscribe(client: Client, channels: Vec<String>) -> Self {
        Self {
            client,
            channels,
            config: ReconnectConfig::default(),
            stats: Arc::new(ReconnectStats::default()),
        }
    }

    pub fn with_config(mut self, config: ReconnectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stats(&self) -> &Arc<ReconnectStats> {
        &self.stats
    }

    /// Subscribe once in the foreground, then hand the connection to a
    /// background task that forwards payloads into `sender`.
    ///
    /// The first subscribe must succeed; later losses are retried.
    pub async fn start(self, sender: SubscriptionSender) -> Result<JoinHandle<()>> {
        self.stats.record_attempt();
        let pubsub = self.connect_and_subscribe().await?;
        self.stats.record_success();
        Ok(tokio::spawn(reconnecting_task(self, Some(pubsub), sender)))
    }

    async fn connect_and_subscribe(&self) -> Result<PubSub> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .context("Failed to get async Redis connection")?;

        let mut pubsub = conn.into_pubsub();
        for channel in &self.channels {
            pubsub
                .subscribe(channel)
                .await
                .with_context(|| format!("Failed to subscribe to channel: {}", channel))?;
        }
        info!("Subscribed to channels: {:?}", self.channels);

        Ok(pubsub)
    }
}

/// Background task that handles reconnection logic
async fn reconnecting_task(
    reconnecting_pubsub: ReconnectingPubSub,
    mut initial: Option<PubSub>,
    sender: SubscriptionSender,
) {
    let stats = &reconnecting_pubsub.stats;
    let config = &reconnecting_pubsub.config;

    loop {
        let mut pubsub = match initial.take() {
            Some(pubsub) => pubsub,
            None => {
                let consecutive_failures = stats.get_consecutive_failures();
                if config.should_pause(consecutive_failures) {
                    error!(
                        "Circuit breaker OPENED after {} consecutive failures. Pausing reconnection attempts for {:?}.",
                        consecutive_failures, config.cool_off
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(config.cool_off) => {}
                        _ = sender.closed() => return,
                    }
                    stats.reset_failures();
                    continue;
                }

                if consecutive_failures > 0 {
                    let delay = config.calculate_delay(consecutive_failures);
                    info!(
                        "Reconnecting in {:?} (consecutive failures: {})",
                        delay, consecutive_failures
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = sender.closed() => return,
                    }
                }

                stats.record_attempt();
                match reconnecting_pubsub.connect_and_subscribe().await {
                    Ok(pubsub) => {
                        stats.record_connected();
                        info!(
                            "Successfully reconnected (total reconnects: {})",
                            stats.successful_reconnects.load(Ordering::Relaxed)
                        );
                        pubsub
                    }
                    Err(e) => {
                        stats.record_failure();
                        error!(
                            "Failed to connect (attempt {}): {:#}",
                            consecutive_failures + 1,
                            e
                        );
                        continue;
                    }
                }
            }
        };

        let started = Instant::now();
        let mut delivered = false;
        {
            let mut stream = pubsub.on_message();
            loop {
                let msg = tokio::select! {
                    msg = stream.next() => msg,
                    _ = sender.closed() => {
                        info!("Subscriber dropped, stopping reconnecting task");
                        return;
                    }
                };
                let Some(msg) = msg else { break };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Non-UTF8 payload on {}: {}", msg.get_channel_name(), e);
                        continue;
                    }
                };
                if sender.offer(payload) == Offer::Closed {
                    info!("Subscriber dropped, stopping reconnecting task");
                    return;
                }
                delivered = true;
            }
        }

        // Only a session that carried traffic or stayed up clears the failure streak.
        if delivered || config.is_stable_session(started.elapsed()) {
            stats.reset_failures();
        }
        stats.record_failure();
        warn!(
            "Redis PubSub stream ended, will reconnect (consecutive failures: {})",
            stats.get_consecutive_failures()
        );
    }
}
