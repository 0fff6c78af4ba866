use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use crate::backoff::ReconnectConfig;
use crate::broker::{Broker, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
use crate::utils::env::{env_parse, string_or};

use super::pubsub_reconnect::ReconnectingPubSub;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_OP_TIMEOUT_MS: u64 = 2000;

/// Redis pub/sub broker.
///
/// Publishing goes through a shared `ConnectionManager`, which re-dials on
/// its own after a dropped connection. Every subscription gets a dedicated
/// pub/sub connection that resubscribes with backoff.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: ConnectionManager,
    reconnect: ReconnectConfig,
    subscriber_buffer: usize,
    op_timeout: Duration,
}

impl RedisBus {
    /// Connect using `REDIS_URL`, `BROKER_SUBSCRIBER_BUFFER` and `REDIS_OP_TIMEOUT_MS`.
    pub async fn new() -> Result<Self> {
        let redis_url = string_or("REDIS_URL", DEFAULT_REDIS_URL);
        let mut bus = Self::connect(&redis_url).await?;
        bus.subscriber_buffer =
            env_parse("BROKER_SUBSCRIBER_BUFFER").unwrap_or(DEFAULT_SUBSCRIBER_BUFFER);
        bus.op_timeout = Duration::from_millis(
            env_parse("REDIS_OP_TIMEOUT_MS").unwrap_or(DEFAULT_OP_TIMEOUT_MS),
        );
        bus.reconnect = ReconnectConfig::from_env("REDIS");
        Ok(bus)
    }

    /// Connect and verify the server answers PING. Fails fast so startup
    /// misconfiguration is fatal.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
        let mut connection = ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to Redis")?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .context("Redis PING failed")?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            connection,
            reconnect: ReconnectConfig::default(),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
        })
    }

    pub fn with_subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer;
        self
    }

    pub fn get_client(&self) -> Client {
        self.client.clone()
    }

    /// Shared multiplexed connection, e.g. for stream producers.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }
}

#[async_trait]
impl Broker for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        tokio::time::timeout(self.op_timeout, conn.publish::<_, _, ()>(channel, payload))
            .await
            .with_context(|| format!("Publish to {} timed out", channel))?
            .with_context(|| format!("Failed to publish to {}", channel))?;
        debug!("Published {} bytes to {}", payload.len(), channel);
        Ok(())
    }

    async fn open_subscription(&self, channel: &str) -> Result<Subscription> {
        let (sender, subscription) = Subscription::bounded(channel, self.subscriber_buffer);
        ReconnectingPubSub::subscribe(self.client.clone(), vec![channel.to_string()])
            .with_config(self.reconnect.clone())
            .start(sender)
            .await?;
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::FnHandler;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(RedisBus::connect("not-a-url").await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_publish_subscribe_roundtrip() {
        let bus = RedisBus::connect(DEFAULT_REDIS_URL).await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = bus
            .subscribe(
                "mirrorx-test",
                Arc::new(FnHandler(move |p: String| {
                    let tx = tx.clone();
                    async move {
                        tx.send(p)?;
                        Ok::<(), anyhow::Error>(())
                    }
                })),
            )
            .await
            .unwrap();

        bus.publish("mirrorx-test", "hello").await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
    }
}
