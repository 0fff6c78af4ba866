//! Durable hand-off to the matching engine.

use anyhow::Result;
use async_trait::async_trait;
use mirrorx_core::models::Order;
use mirrorx_core::redis::OrderStream;
use parking_lot::Mutex;

#[async_trait]
pub trait OrderQueue: Send + Sync + 'static {
    /// Durably append `order`. Returns the queue position id once accepted.
    async fn enqueue(&self, order: &Order) -> Result<String>;
}

#[async_trait]
impl OrderQueue for OrderStream {
    async fn enqueue(&self, order: &Order) -> Result<String> {
        self.append(order).await
    }
}

/// In-memory queue for tests and local runs without Redis.
#[derive(Default)]
pub struct MemoryOrderQueue {
    orders: Mutex<Vec<Order>>,
}

impl MemoryOrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl OrderQueue for MemoryOrderQueue {
    async fn enqueue(&self, order: &Order) -> Result<String> {
        let mut orders = self.orders.lock();
        orders.push(order.clone());
        Ok(format!("{}-0", orders.len()))
    }
}
