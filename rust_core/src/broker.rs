//! Named-channel publish/subscribe.
//!
//! Delivery is at-most-once with no persistence. Every subscription owns a
//! bounded buffer: when it is full the newest message is rejected for that
//! subscriber only, so a slow consumer never stalls the publisher or its
//! sibling subscribers. Handlers run on a task per subscription; an error or
//! panic in one delivery is logged and the next delivery proceeds.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default per-subscription buffer, overridable with `BROKER_SUBSCRIBER_BUFFER`.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Fire-and-forget publish. Succeeds even with zero subscribers.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Open a raw bounded stream of payloads for `channel`.
    async fn open_subscription(&self, channel: &str) -> Result<Subscription>;

    /// Subscribe `handler` to `channel`; deliveries start immediately.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle> {
        let subscription = self.open_subscription(channel).await?;
        Ok(SubscriptionHandle::spawn(subscription, handler))
    }
}

/// Serialize `message` as JSON and publish it.
pub async fn publish_json<B, T>(broker: &B, channel: &str, message: &T) -> Result<()>
where
    B: Broker + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string(message)?;
    broker.publish(channel, &payload).await
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, channel: &str, payload: &str) -> Result<()>;
}

/// Adapter so plain async closures can be used as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, _channel: &str, payload: &str) -> Result<()> {
        (self.0)(payload.to_string()).await
    }
}

// ============================================================================
// Bounded subscription buffer
// ============================================================================

#[derive(Debug, Default)]
pub struct SubscriptionStats {
    pub delivered: AtomicU64,
    pub handler_failures: AtomicU64,
    pub dropped_full: AtomicU64,
}

/// Result of offering a payload to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Buffer full; this payload was rejected for this subscriber.
    Dropped,
    /// Subscriber is gone and should be pruned.
    Closed,
}

/// Producer half of a subscription buffer.
#[derive(Clone)]
pub struct SubscriptionSender {
    channel: Arc<str>,
    tx: mpsc::Sender<String>,
    stats: Arc<SubscriptionStats>,
}

impl SubscriptionSender {
    pub fn offer(&self, payload: String) -> Offer {
        match self.tx.try_send(payload) {
            Ok(()) => Offer::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.stats.dropped_full.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(
                        "Subscriber buffer full on {}, rejecting newest message (dropped total: {})",
                        self.channel, dropped
                    );
                }
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consuming side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Consumer half of a subscription buffer.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<String>,
    stats: Arc<SubscriptionStats>,
}

impl Subscription {
    pub fn bounded(channel: &str, capacity: usize) -> (SubscriptionSender, Subscription) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(SubscriptionStats::default());
        (
            SubscriptionSender {
                channel: Arc::from(channel),
                tx,
                stats: stats.clone(),
            },
            Subscription {
                channel: channel.to_string(),
                rx,
                stats,
            },
        )
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn stats(&self) -> &Arc<SubscriptionStats> {
        &self.stats
    }
}

// ============================================================================
// Handler dispatch
// ============================================================================

/// Owns the dispatch task of one subscription.
pub struct SubscriptionHandle {
    channel: String,
    stats: Arc<SubscriptionStats>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn spawn(mut subscription: Subscription, handler: Arc<dyn MessageHandler>) -> Self {
        let channel = subscription.channel.clone();
        let stats = subscription.stats.clone();

        let task_stats = stats.clone();
        let task = tokio::spawn(async move {
            let channel = subscription.channel.clone();
            while let Some(payload) = subscription.next().await {
                let outcome = AssertUnwindSafe(handler.handle(&channel, &payload))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {
                        task_stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        task_stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                        warn!("Handler for {} failed: {:#}", channel, e);
                    }
                    Err(_) => {
                        task_stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                        error!("Handler for {} panicked; continuing with next message", channel);
                    }
                }
            }
            info!("Subscription to {} ended", channel);
        });

        Self {
            channel,
            stats,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stats(&self) -> &Arc<SubscriptionStats> {
        &self.stats
    }

    /// Stop this subscription. Other subscriptions are unaffected.
    pub fn cancel(&self) {
        debug!("Cancelling subscription to {}", self.channel);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the subscription ends (source closed or cancelled).
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}

// ============================================================================
// In-process broker
// ============================================================================

/// Broker backed by tokio channels. Same delivery contract as `RedisBus`,
/// scoped to one process.
#[derive(Clone)]
pub struct InProcessBroker {
    subscribers: Arc<Mutex<HashMap<String, Vec<SubscriptionSender>>>>,
    buffer: usize,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            buffer,
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .get(channel)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let targets = match self.subscribers.lock().get(channel) {
            Some(subs) => subs.clone(),
            None => return Ok(()),
        };

        let mut saw_closed = false;
        for target in &targets {
            if target.offer(payload.to_string()) == Offer::Closed {
                saw_closed = true;
            }
        }

        if saw_closed {
            if let Some(subs) = self.subscribers.lock().get_mut(channel) {
                subs.retain(|s| !s.is_closed());
            }
        }
        Ok(())
    }

    async fn open_subscription(&self, channel: &str) -> Result<Subscription> {
        let (sender, subscription) = Subscription::bounded(channel, self.buffer);
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(subscription)
    }
}
