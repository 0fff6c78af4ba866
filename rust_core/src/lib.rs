//! MirrorX Core - shared plumbing for the market-data and order-intake services.
//!
//! This crate provides:
//! - Wire models for price updates, liquidations, ticks and orders
//! - Quote pricing with a runtime-adjustable skew ratio
//! - The `Broker` abstraction (Redis pub/sub and an in-process variant)
//! - The durable order stream (Redis streams with bounded retention)
//! - Postgres pool creation, health checks and retry helpers
//! - Reconnect backoff, env parsing and tracing setup shared by every service

pub mod backoff;
pub mod broker;
pub mod db;
pub mod models;
pub mod pricing;
pub mod redis;
pub mod telemetry;
pub mod utils;

pub use broker::{Broker, MessageHandler, SubscriptionHandle};
pub use models::{channels, LiquidationEvent, LiquidationTarget, Order, PriceTick, PriceUpdateEvent, Side};
pub use pricing::{quote, Quote, SkewRatio, DEFAULT_SPREAD_CONSTANT};
