//! Connection registry and dispatch.
//!
//! All table access goes through one `parking_lot::Mutex` and never spans
//! an await. Dispatch clones the target senders under the lock and queues
//! payloads after releasing it; each connection's writer task drains its own
//! bounded queue, so a slow socket only loses its own messages.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_OUTBOUND_CAPACITY;
use crate::protocol::{parse_client_frame, ClientFrame, FrameError, ServerEvent};
use crate::table::{BindOutcome, ConnectionId, RoutingTable};

pub type Outbound = mpsc::Sender<String>;

#[derive(Debug, Default)]
pub struct RouterStats {
    pub broadcast_deliveries: AtomicU64,
    pub targeted_deliveries: AtomicU64,
    pub targeted_unbound: AtomicU64,
    pub outbound_dropped: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub evictions: AtomicU64,
}

pub struct ConnectionRouter {
    table: Mutex<RoutingTable<Outbound>>,
    next_id: AtomicU64,
    outbound_capacity: usize,
    stats: RouterStats,
}

impl ConnectionRouter {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            table: Mutex::new(RoutingTable::new()),
            next_id: AtomicU64::new(1),
            outbound_capacity: outbound_capacity.max(1),
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Add a live, unbound connection. The receiver is the connection's
    /// outbound queue; it ends once the connection is closed.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.table.lock().insert(conn, tx);
        debug!("Connection {} registered", conn);
        (conn, rx)
    }

    /// Process one inbound text frame. Protocol violations are answered on
    /// the same connection and otherwise ignored.
    pub fn handle_frame(&self, conn: ConnectionId, text: &str) {
        match parse_client_frame(text) {
            Ok(ClientFrame::Auth(user)) => {
                self.authenticate(conn, &user);
            }
            Err(err) => self.reject(conn, &err),
        }
    }

    pub fn reject(&self, conn: ConnectionId, err: &FrameError) {
        self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
        debug!("Connection {} protocol violation: {}", conn, err);
        let handle = self.table.lock().handle(conn);
        if let Some(tx) = handle {
            self.deliver(&tx, ServerEvent::from(err).to_json());
        }
    }

    pub fn authenticate(&self, conn: ConnectionId, user: &str) -> BindOutcome {
        let outcome = self.table.lock().bind(conn, user);
        match &outcome {
            BindOutcome::Bound {
                evicted,
                replaced_user,
            } => {
                if let Some(previous) = evicted {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "User {} moved from connection {} to {}",
                        user, previous, conn
                    );
                }
                if let Some(old_user) = replaced_user {
                    info!("Connection {} re-authenticated: {} -> {}", conn, old_user, user);
                }
                debug!("Connection {} bound to {}", conn, user);
            }
            BindOutcome::AlreadyBound => {}
            BindOutcome::UnknownConnection => {
                warn!("AUTH from unregistered connection {}", conn);
            }
        }
        outcome
    }

    /// Remove the connection from the live set and the binding table.
    pub fn close(&self, conn: ConnectionId) {
        if self.table.lock().remove(conn).is_some() {
            debug!("Connection {} closed", conn);
        }
    }

    /// Queue `payload` on every live connection. Returns how many accepted it.
    pub fn broadcast(&self, payload: &str) -> usize {
        let targets = self.table.lock().live_handles();
        let mut delivered = 0;
        for tx in &targets {
            if self.deliver(tx, payload.to_string()) {
                delivered += 1;
            }
        }
        self.stats
            .broadcast_deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Queue `payload` for the connection bound to `user`. Unbound users are
    /// dropped silently.
    pub fn targeted(&self, user: &str, payload: &str) -> bool {
        let target = self.table.lock().handle_for_user(user);
        match target {
            Some(tx) => {
                let delivered = self.deliver(&tx, payload.to_string());
                if delivered {
                    self.stats.targeted_deliveries.fetch_add(1, Ordering::Relaxed);
                }
                delivered
            }
            None => {
                self.stats.targeted_unbound.fetch_add(1, Ordering::Relaxed);
                debug!("No connection bound to {}, dropping targeted message", user);
                false
            }
        }
    }

    pub fn user_of(&self, conn: ConnectionId) -> Option<String> {
        self.table.lock().user_of(conn).map(str::to_string)
    }

    pub fn live_count(&self) -> usize {
        self.table.lock().live_count()
    }

    pub fn bound_count(&self) -> usize {
        self.table.lock().bound_count()
    }

    fn deliver(&self, tx: &Outbound, payload: String) -> bool {
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.stats.outbound_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!("Outbound queue full, dropping message (dropped total: {})", dropped);
                }
                false
            }
            // Connection is closing; its entry is about to be removed.
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl Default for ConnectionRouter {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}
