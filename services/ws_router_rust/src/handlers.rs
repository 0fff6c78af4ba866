//! Broker subscriptions feeding the router.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mirrorx_core::broker::MessageHandler;
use mirrorx_core::models::{LiquidationEvent, PriceUpdateEvent};
use std::sync::Arc;
use tracing::debug;

use crate::protocol::ServerEvent;
use crate::router::ConnectionRouter;

/// `priceUpdates` -> every live connection.
pub struct PriceBroadcastHandler {
    router: Arc<ConnectionRouter>,
}

impl PriceBroadcastHandler {
    pub fn new(router: Arc<ConnectionRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for PriceBroadcastHandler {
    async fn handle(&self, _channel: &str, payload: &str) -> Result<()> {
        // Round-trip so only well-formed updates reach clients.
        let event: PriceUpdateEvent =
            serde_json::from_str(payload).context("Malformed price update")?;
        let outbound = serde_json::to_string(&event)?;
        let delivered = self.router.broadcast(&outbound);
        debug!("Broadcast {} to {} connections", event.symbol, delivered);
        Ok(())
    }
}

/// `liquidations` -> one `force-liquidation` per position, to its owner only.
pub struct LiquidationHandler {
    router: Arc<ConnectionRouter>,
}

impl LiquidationHandler {
    pub fn new(router: Arc<ConnectionRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for LiquidationHandler {
    async fn handle(&self, _channel: &str, payload: &str) -> Result<()> {
        let event: LiquidationEvent =
            serde_json::from_str(payload).context("Malformed liquidation event")?;
        for target in &event.positions {
            let message = ServerEvent::ForceLiquidation {
                position_id: target.position_id.clone(),
            };
            self.router.targeted(&target.user_id, &message.to_json());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_price_update_is_reserialized() {
        let router = Arc::new(ConnectionRouter::default());
        let (_, mut rx) = router.register();
        let handler = PriceBroadcastHandler::new(router.clone());

        handler
            .handle("priceUpdates", r#"{ "sell": 99.9, "symbol": "BTC", "buy": 100.1, "extra": 1 }"#)
            .await
            .unwrap();
        assert!(handler.handle("priceUpdates", "not json").await.is_err());

        let got = drain(&mut rx);
        assert_eq!(got, vec![r#"{"symbol":"BTC","buy":100.1,"sell":99.9}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_liquidation_fans_out_per_position() {
        let router = Arc::new(ConnectionRouter::default());
        let (a, mut rx_a) = router.register();
        let (b, mut rx_b) = router.register();
        let (_, mut rx_c) = router.register();
        router.authenticate(a, "u1");
        router.authenticate(b, "u2");
        let handler = LiquidationHandler::new(router.clone());

        handler
            .handle(
                "liquidations",
                r#"{"positions":[{"user_id":"u1","position_id":"p1"},{"user_id":"ghost","position_id":"p9"},{"user_id":"u1","position_id":"p2"}]}"#,
            )
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx_a),
            vec![
                r#"{"event":"force-liquidation","positionId":"p1"}"#.to_string(),
                r#"{"event":"force-liquidation","positionId":"p2"}"#.to_string(),
            ]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert!(drain(&mut rx_c).is_empty());
    }
}
