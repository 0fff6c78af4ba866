//! HTTP surface.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::BearerToken;
use crate::error::AppError;
use crate::intake::OrderIntake;
use crate::models::{OpenOrderRequest, OpenOrderResponse};

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<OrderIntake>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/order/open", post(open_order))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn open_order(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    payload: Result<Json<OpenOrderRequest>, JsonRejection>,
) -> Result<Json<OpenOrderResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let order = state.intake.open_order(&token, request).await?;
    Ok(Json(OpenOrderResponse {
        order_id: order.order_id,
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
