//! order_intake_rust - `POST /order/open` onto the durable order stream

pub mod auth;
pub mod config;
pub mod error;
pub mod intake;
pub mod models;
pub mod queue;
pub mod server;

pub use auth::{BearerPassthrough, IdentityResolver};
pub use config::IntakeConfig;
pub use error::AppError;
pub use intake::{EnqueueRetry, IntakeError, OrderIntake};
pub use queue::{MemoryOrderQueue, OrderQueue};
pub use server::{create_app, AppState};
