//! ws_router_rust - websocket fan-out of price updates and targeted liquidations

pub mod config;
pub mod handlers;
pub mod protocol;
pub mod router;
pub mod server;
pub mod table;

pub use config::RouterConfig;
pub use handlers::{LiquidationHandler, PriceBroadcastHandler};
pub use router::ConnectionRouter;
pub use server::{create_app, AppState};
pub use table::{BindOutcome, ConnectionId, RoutingTable};
