//! Durable order queue on a Redis stream.
//!
//! Producers append with `XADD` and an approximate trim so the stream stays
//! bounded by entry count or by age. Consumers read through a consumer group
//! and acknowledge after processing; unacknowledged entries are redelivered
//! on restart via [`OrderStreamConsumer::read_pending`].

use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::Order;

pub const DEFAULT_ORDER_STREAM: &str = "orders";
/// Field name holding the JSON-encoded order in each stream entry.
pub const ORDER_FIELD: &str = "order";
/// Default retention cap in bytes (2 GiB).
pub const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;
/// Assumed average encoded size of one entry, used to turn a byte cap into
/// an entry cap.
pub const DEFAULT_ENTRY_BYTES: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep roughly the newest `n` entries.
    MaxLen(u64),
    /// Drop entries older than the given age.
    MaxAge(Duration),
}

impl RetentionPolicy {
    /// Approximate a byte budget as an entry count.
    pub fn from_bytes(max_bytes: u64, entry_bytes: u64) -> Self {
        RetentionPolicy::MaxLen((max_bytes / entry_bytes.max(1)).max(1))
    }

    /// Trim arguments for `XADD`, evaluated at `now_ms`.
    fn trim_args(&self, now_ms: i64) -> (&'static str, String) {
        match self {
            RetentionPolicy::MaxLen(n) => ("MAXLEN", n.to_string()),
            RetentionPolicy::MaxAge(age) => {
                let min_ms = (now_ms - age.as_millis() as i64).max(0);
                ("MINID", min_ms.to_string())
            }
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_bytes(DEFAULT_MAX_BYTES, DEFAULT_ENTRY_BYTES)
    }
}

// ============================================================================
// Producer
// ============================================================================

#[derive(Clone)]
pub struct OrderStream {
    conn: ConnectionManager,
    key: String,
    retention: RetentionPolicy,
    timeout: Duration,
}

impl OrderStream {
    pub fn new(conn: ConnectionManager, key: impl Into<String>, retention: RetentionPolicy, timeout: Duration) -> Self {
        Self {
            conn,
            key: key.into(),
            retention,
            timeout,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append one order. Returns the stream entry id once Redis has accepted it.
    pub async fn append(&self, order: &Order) -> Result<String> {
        let payload = serde_json::to_string(order)?;
        let (trim, threshold) = self.retention.trim_args(Utc::now().timestamp_millis());

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.key)
            .arg(trim)
            .arg("~")
            .arg(threshold)
            .arg("*")
            .arg(ORDER_FIELD)
            .arg(payload);

        let mut conn = self.conn.clone();
        let entry_id = tokio::time::timeout(self.timeout, cmd.query_async::<_, String>(&mut conn))
            .await
            .context("XADD timed out")?
            .context("XADD failed")?;

        debug!("Appended order {} as {} on {}", order.order_id, entry_id, self.key);
        Ok(entry_id)
    }
}

// ============================================================================
// Consumer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StreamedOrder {
    pub entry_id: String,
    pub order: Order,
}

/// Consumer-group reader. Use a connection of its own: blocking reads stall
/// anything else multiplexed on the same connection.
pub struct OrderStreamConsumer {
    conn: ConnectionManager,
    key: String,
    group: String,
    consumer: String,
    batch: usize,
    block: Duration,
}

impl OrderStreamConsumer {
    pub fn new(
        conn: ConnectionManager,
        key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            key: key.into(),
            group: group.into(),
            consumer: consumer.into(),
            batch: 100,
            block: Duration::from_millis(1000),
        }
    }

    pub fn with_batch(mut self, batch: usize, block: Duration) -> Self {
        self.batch = batch.max(1);
        self.block = block;
        self
    }

    /// Create the group at the stream tail if it does not exist yet.
    pub async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.key, &self.group, "$")
            .await;
        match created {
            Ok(()) => {
                info!("Created consumer group {} on {}", self.group, self.key);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("XGROUP CREATE failed")),
        }
    }

    /// Next batch of entries never delivered to this group.
    pub async fn read(&self) -> Result<Vec<StreamedOrder>> {
        self.read_from(">").await
    }

    /// Entries delivered to this consumer but not yet acknowledged.
    pub async fn read_pending(&self) -> Result<Vec<StreamedOrder>> {
        self.read_from("0").await
    }

    pub async fn ack(&self, entry_ids: &[String]) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let acked: u64 = conn
            .xack(&self.key, &self.group, entry_ids)
            .await
            .context("XACK failed")?;
        Ok(acked)
    }

    async fn read_from(&self, id: &str) -> Result<Vec<StreamedOrder>> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch)
            .block(self.block.as_millis() as usize);

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.key], &[id], &opts)
            .await
            .context("XREADGROUP failed")?;

        let mut orders = Vec::new();
        for stream_key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                let Some(raw) = entry.get::<String>(ORDER_FIELD) else {
                    warn!("Stream entry {} has no {} field", entry.id, ORDER_FIELD);
                    continue;
                };
                match serde_json::from_str::<Order>(&raw) {
                    Ok(order) => orders.push(StreamedOrder {
                        entry_id: entry.id.clone(),
                        order,
                    }),
                    Err(e) => warn!("Undecodable order at {}: {}", entry.id, e),
                }
            }
        }
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_cap_converts_to_entry_cap() {
        assert_eq!(
            RetentionPolicy::default(),
            RetentionPolicy::MaxLen(4 * 1024 * 1024)
        );
        assert_eq!(RetentionPolicy::from_bytes(100, 0), RetentionPolicy::MaxLen(100));
        assert_eq!(RetentionPolicy::from_bytes(10, 512), RetentionPolicy::MaxLen(1));
    }

    #[test]
    fn test_trim_args() {
        assert_eq!(
            RetentionPolicy::MaxLen(500).trim_args(0),
            ("MAXLEN", "500".to_string())
        );
        assert_eq!(
            RetentionPolicy::MaxAge(Duration::from_secs(60)).trim_args(100_000),
            ("MINID", "40000".to_string())
        );
        assert_eq!(
            RetentionPolicy::MaxAge(Duration::from_secs(60)).trim_args(1_000),
            ("MINID", "0".to_string())
        );
    }
}
