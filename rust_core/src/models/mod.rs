// Shared models for MirrorX Rust services
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Market Data Events (broker payloads)
// ============================================================================

/// One quoted price per feed tick, published on `priceUpdates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateEvent {
    pub symbol: String,
    pub buy: f64,
    pub sell: f64,
}

impl PriceUpdateEvent {
    /// Representative trade price: the midpoint of the two quotes.
    pub fn mid_price(&self) -> f64 {
        (self.buy + self.sell) / 2.0
    }
}

/// A single position an external risk process wants force-closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationTarget {
    pub user_id: String,
    pub position_id: String,
}

/// Published on `liquidations`. Positions are fanned out in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub positions: Vec<LiquidationTarget>,
}

/// Control message on `skewUpdates`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewUpdate {
    pub ratio: f64,
}

// ============================================================================
// Persisted Ticks
// ============================================================================

/// Append-only tick row. `time` is assigned by the store at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub price: f64,
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// An order as handed to the matching engine. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub submitted_at: DateTime<Utc>,
}

// ============================================================================
// Broker Channels
// ============================================================================

pub mod channels {
    pub const PRICE_UPDATES: &str = "priceUpdates";
    pub const LIQUIDATIONS: &str = "liquidations";
    pub const SKEW_UPDATES: &str = "skewUpdates";
}
