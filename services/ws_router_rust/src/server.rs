//! HTTP/websocket surface.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::protocol::FrameError;
use crate::router::ConnectionRouter;
use crate::table::ConnectionId;

/// How long a closed connection's writer may spend flushing queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ConnectionRouter>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router))
}

async fn handle_socket(socket: WebSocket, router: Arc<ConnectionRouter>) {
    let (conn, outbound) = router.register();
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_outbound(outbound, sink));

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => router.handle_frame(conn, &text),
            Ok(Message::Binary(_)) => router.reject(conn, &FrameError::Binary),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Connection {} read error: {}", conn, e);
                break;
            }
        }
    }

    // Dropping the router's sender ends the writer once its queue is empty.
    router.close(conn);
    drain_writer(conn, writer).await;
}

/// Forward queued frames until the sender is dropped, then close the sink.
/// Returns how many frames were written.
async fn write_outbound<S>(mut outbound: mpsc::Receiver<String>, mut sink: S) -> usize
where
    S: Sink<Message> + Unpin,
{
    let mut sent = 0;
    while let Some(payload) = outbound.recv().await {
        if sink.send(Message::Text(payload)).await.is_err() {
            break;
        }
        sent += 1;
    }
    let _ = sink.close().await;
    sent
}

async fn drain_writer(conn: ConnectionId, mut writer: JoinHandle<usize>) {
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(sent)) => debug!("Connection {} writer finished after {} frames", conn, sent),
        Ok(Err(e)) => warn!("Connection {} writer task failed: {}", conn, e),
        Err(_) => {
            debug!("Connection {} writer did not drain within {:?}", conn, WRITER_DRAIN_TIMEOUT);
            writer.abort();
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "live_connections": state.router.live_count(),
        "bound_connections": state.router.bound_count(),
    }))
}
