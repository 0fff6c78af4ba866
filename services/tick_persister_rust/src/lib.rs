//! tick_persister_rust - appends one tick per `priceUpdates` event

pub mod config;
pub mod persister;
pub mod store;

pub use config::{PersisterConfig, RetryConfig};
pub use persister::{PersistStats, TickPersister};
pub use store::{MemoryTickStore, PgTickStore, TickStore};
