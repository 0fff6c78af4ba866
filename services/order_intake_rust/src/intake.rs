//! Order intake: identity, validation, id assignment, enqueue.

use anyhow::anyhow;
use chrono::Utc;
use mirrorx_core::backoff::{retry_with_backoff, ReconnectConfig};
use mirrorx_core::models::Order;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::auth::IdentityResolver;
use crate::models::OpenOrderRequest;
use crate::queue::OrderQueue;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid order: {0}")]
    Validation(String),
    #[error("order queue unavailable")]
    QueueUnavailable(#[source] anyhow::Error),
}

/// Bounded retry for queue publishes. Every attempt reuses the same order id,
/// and the whole sequence must finish within `budget`.
#[derive(Debug, Clone)]
pub struct EnqueueRetry {
    pub max_attempts: u32,
    pub backoff: ReconnectConfig,
    pub budget: Duration,
}

impl Default for EnqueueRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: ReconnectConfig {
                base_delay_ms: 50,
                max_delay_ms: 500,
                jitter_pct: 0.1,
                ..Default::default()
            },
            budget: Duration::from_secs(5),
        }
    }
}

pub struct OrderIntake {
    resolver: Arc<dyn IdentityResolver>,
    queue: Arc<dyn OrderQueue>,
    tradable_symbols: HashSet<String>,
    retry: EnqueueRetry,
}

impl OrderIntake {
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        queue: Arc<dyn OrderQueue>,
        tradable_symbols: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            resolver,
            queue,
            tradable_symbols: tradable_symbols
                .into_iter()
                .map(|s| s.trim().to_uppercase())
                .collect(),
            retry: EnqueueRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: EnqueueRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve the caller, validate, assign a fresh order id and enqueue.
    ///
    /// No idempotency key: identical calls create distinct orders. Nothing is
    /// enqueued unless identity and fields are valid, and success is only
    /// reported after the queue accepted the order.
    pub async fn open_order(&self, token: &str, request: OpenOrderRequest) -> Result<Order, IntakeError> {
        let user_id = self
            .resolver
            .resolve(token)
            .await
            .ok_or_else(|| IntakeError::Auth("identity could not be resolved".to_string()))?;

        let symbol = request.symbol.trim().to_uppercase();
        if !self.tradable_symbols.contains(&symbol) {
            return Err(IntakeError::Validation(format!("symbol {:?} is not tradable", request.symbol)));
        }
        validate_positive("quantity", request.quantity)?;
        validate_positive("price", request.price)?;

        let order = Order {
            order_id: Uuid::new_v4().to_string(),
            user_id,
            symbol,
            side: request.side,
            quantity: request.quantity,
            price: request.price,
            submitted_at: Utc::now(),
        };

        let attempts = retry_with_backoff(
            &self.retry.backoff,
            self.retry.max_attempts,
            "Order enqueue",
            || self.queue.enqueue(&order),
        );
        let position = tokio::time::timeout(self.retry.budget, attempts)
            .await
            .map_err(|_| {
                IntakeError::QueueUnavailable(anyhow!(
                    "enqueue did not complete within {:?}",
                    self.retry.budget
                ))
            })?
            .map_err(IntakeError::QueueUnavailable)?;

        info!(
            "Order {} accepted for {}: {} {} {} @ {} ({})",
            order.order_id,
            order.user_id,
            order.side.as_str(),
            order.quantity,
            order.symbol,
            order.price,
            position
        );
        Ok(order)
    }
}

fn validate_positive(field: &str, value: f64) -> Result<(), IntakeError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(IntakeError::Validation(format!("{} must be a positive number", field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BearerPassthrough;
    use crate::queue::MemoryOrderQueue;
    use anyhow::Result;
    use async_trait::async_trait;
    use mirrorx_core::models::Side;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct DownQueue;

    /// Fails the first enqueue with a transport error, then accepts.
    #[derive(Default)]
    struct ResetOnceQueue {
        attempts: AtomicU32,
        accepted: MemoryOrderQueue,
    }

    #[async_trait]
    impl OrderQueue for ResetOnceQueue {
        async fn enqueue(&self, order: &Order) -> Result<String> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset by peer");
            }
            self.accepted.enqueue(order).await
        }
    }

    struct HangingQueue;

    #[async_trait]
    impl OrderQueue for HangingQueue {
        async fn enqueue(&self, _order: &Order) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".to_string())
        }
    }

    fn fast_retry() -> EnqueueRetry {
        EnqueueRetry {
            max_attempts: 3,
            backoff: ReconnectConfig {
                base_delay_ms: 1,
                max_delay_ms: 5,
                jitter_pct: 0.0,
                ..Default::default()
            },
            budget: Duration::from_secs(2),
        }
    }

    #[async_trait]
    impl OrderQueue for DownQueue {
        async fn enqueue(&self, _order: &Order) -> Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    fn request() -> OpenOrderRequest {
        OpenOrderRequest {
            symbol: "btc".to_string(),
            side: Side::Buy,
            quantity: 0.5,
            price: 50000.0,
        }
    }

    fn intake(queue: Arc<dyn OrderQueue>) -> OrderIntake {
        OrderIntake::new(Arc::new(BearerPassthrough), queue, vec!["BTC".to_string()])
    }

    #[tokio::test]
    async fn test_identical_calls_create_distinct_orders() {
        let queue = Arc::new(MemoryOrderQueue::new());
        let intake = intake(queue.clone());

        let first = intake.open_order("u1", request()).await.unwrap();
        let second = intake.open_order("u1", request()).await.unwrap();

        assert_ne!(first.order_id, second.order_id);
        assert_eq!(first.user_id, "u1");
        assert_eq!(first.symbol, "BTC");
        assert_eq!(queue.orders().len(), 2);
    }

    #[tokio::test]
    async fn test_rejections_never_reach_the_queue() {
        let queue = Arc::new(MemoryOrderQueue::new());
        let intake = intake(queue.clone());

        assert!(matches!(intake.open_order("", request()).await, Err(IntakeError::Auth(_))));

        let mut bad_symbol = request();
        bad_symbol.symbol = "DOGE".to_string();
        let mut zero_qty = request();
        zero_qty.quantity = 0.0;
        let mut nan_price = request();
        nan_price.price = f64::NAN;
        for req in [bad_symbol, zero_qty, nan_price] {
            assert!(matches!(
                intake.open_order("u1", req).await,
                Err(IntakeError::Validation(_))
            ));
        }

        assert!(queue.orders().is_empty());
    }

    #[tokio::test]
    async fn test_transient_queue_failure_is_retried() {
        let queue = Arc::new(ResetOnceQueue::default());
        let intake = intake(queue.clone()).with_retry(fast_retry());

        let order = intake.open_order("u1", request()).await.unwrap();

        assert_eq!(queue.attempts.load(Ordering::SeqCst), 2);
        let accepted = queue.accepted.orders();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].order_id, order.order_id);
    }

    #[tokio::test]
    async fn test_enqueue_gives_up_within_budget() {
        let mut retry = fast_retry();
        retry.budget = Duration::from_millis(50);
        let intake = intake(Arc::new(HangingQueue)).with_retry(retry);

        let started = std::time::Instant::now();
        let result = intake.open_order("u1", request()).await;

        assert!(matches!(result, Err(IntakeError::QueueUnavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_queue_failure_is_not_success() {
        let intake = intake(Arc::new(DownQueue)).with_retry(fast_retry());
        assert!(matches!(
            intake.open_order("u1", request()).await,
            Err(IntakeError::QueueUnavailable(_))
        ));
    }
}
