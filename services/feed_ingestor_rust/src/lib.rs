//! feed_ingestor_rust - Binance mark-price feed to quoted `priceUpdates`

pub mod config;
pub mod feed;
pub mod ingestor;
pub mod message;

pub use config::FeedConfig;
pub use feed::FeedClient;
pub use ingestor::{FeedIngestor, IngestStats, SkewUpdateHandler};
