//! Tick storage backends.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirrorx_core::models::PriceTick;
use parking_lot::Mutex;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU32, Ordering};

#[async_trait]
pub trait TickStore: Send + Sync + 'static {
    /// Append one tick. The store assigns and returns the timestamp.
    async fn insert_tick(&self, symbol: &str, price: f64) -> Result<DateTime<Utc>>;
}

/// `ticks (time timestamptz, symbol text, price double precision)`.
/// Schema provisioning lives outside this service.
#[derive(Clone)]
pub struct PgTickStore {
    pool: PgPool,
}

impl PgTickStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TickStore for PgTickStore {
    async fn insert_tick(&self, symbol: &str, price: f64) -> Result<DateTime<Utc>> {
        let time: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO ticks (time, symbol, price) VALUES (NOW(), $1, $2) RETURNING time",
        )
        .bind(symbol)
        .bind(price)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to insert tick for {}", symbol))?;
        Ok(time)
    }
}

/// In-memory store. Can be told to fail the next N inserts with a
/// transient-looking error.
#[derive(Default)]
pub struct MemoryTickStore {
    ticks: Mutex<Vec<PriceTick>>,
    fail_next: AtomicU32,
}

impl MemoryTickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn ticks(&self) -> Vec<PriceTick> {
        self.ticks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.ticks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TickStore for MemoryTickStore {
    async fn insert_tick(&self, symbol: &str, price: f64) -> Result<DateTime<Utc>> {
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(anyhow!("connection reset by peer"));
        }

        let time = Utc::now();
        self.ticks.lock().push(PriceTick {
            time,
            symbol: symbol.to_string(),
            price,
        });
        Ok(time)
    }
}
