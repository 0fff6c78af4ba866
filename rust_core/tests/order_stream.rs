//! Order stream against a live Redis. Run with `cargo test -- --ignored`.

use chrono::Utc;
use mirrorx_core::models::{Order, Side};
use mirrorx_core::redis::{OrderStream, OrderStreamConsumer, RedisBus, RetentionPolicy};
use std::time::Duration;

fn order(id: &str) -> Order {
    Order {
        order_id: id.to_string(),
        user_id: "u1".to_string(),
        symbol: "BTC".to_string(),
        side: Side::Sell,
        quantity: 2.0,
        price: 49_000.0,
        submitted_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_unacked_orders_are_redelivered() {
    let key = format!("orders-test-{}", uuid::Uuid::new_v4());
    let producer_bus = RedisBus::connect("redis://localhost:6379").await.unwrap();
    let consumer_bus = RedisBus::connect("redis://localhost:6379").await.unwrap();

    let consumer = OrderStreamConsumer::new(consumer_bus.connection(), key.clone(), "matcher", "m1")
        .with_batch(10, Duration::from_millis(200));
    consumer.ensure_group().await.unwrap();
    consumer.ensure_group().await.unwrap();

    let producer = OrderStream::new(
        producer_bus.connection(),
        key.clone(),
        RetentionPolicy::MaxLen(1000),
        Duration::from_secs(2),
    );
    producer.append(&order("o1")).await.unwrap();
    producer.append(&order("o2")).await.unwrap();

    let batch = consumer.read().await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].order.order_id, "o1");

    // Nothing acknowledged yet: both stay pending for this consumer.
    let pending = consumer.read_pending().await.unwrap();
    assert_eq!(pending.len(), 2);

    let acked = consumer.ack(&[batch[0].entry_id.clone()]).await.unwrap();
    assert_eq!(acked, 1);
    let pending = consumer.read_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].order.order_id, "o2");

    assert!(consumer.read().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_age_retention_append() {
    let key = format!("orders-test-{}", uuid::Uuid::new_v4());
    let bus = RedisBus::connect("redis://localhost:6379").await.unwrap();
    let producer = OrderStream::new(
        bus.connection(),
        key,
        RetentionPolicy::MaxAge(Duration::from_secs(3600)),
        Duration::from_secs(2),
    );
    let id = producer.append(&order("o3")).await.unwrap();
    assert!(id.contains('-'));
}
