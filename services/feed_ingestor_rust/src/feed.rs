//! Websocket session management for the upstream feed.
//!
//! One connection at a time. Each (re)connect re-issues the SUBSCRIBE
//! request; a dropped session reconnects with backoff and a circuit breaker.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use mirrorx_core::backoff::ReconnectStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use crate::config::FeedConfig;
use crate::ingestor::FeedIngestor;
use crate::message::subscribe_request;

pub type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Disconnected(String),
}

struct SessionOutcome {
    end: SessionEnd,
    /// Published at least one price, or stayed up for a full idle timeout.
    healthy: bool,
}

pub struct FeedClient {
    config: FeedConfig,
    ingestor: Arc<FeedIngestor>,
    reconnect_stats: Arc<ReconnectStats>,
    next_request_id: AtomicU64,
}

impl FeedClient {
    pub fn new(config: FeedConfig, ingestor: Arc<FeedIngestor>) -> Self {
        Self {
            config,
            ingestor,
            reconnect_stats: Arc::new(ReconnectStats::default()),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn reconnect_stats(&self) -> &Arc<ReconnectStats> {
        &self.reconnect_stats
    }

    /// Open a socket and send the SUBSCRIBE request.
    pub async fn connect(&self) -> Result<FeedSocket> {
        info!("Connecting to feed at {}", self.config.ws_url);
        let (mut socket, _) = timeout(
            self.config.connect_timeout,
            connect_async(self.config.ws_url.as_str()),
        )
        .await
        .map_err(|_| anyhow!("Feed connect timed out after {:?}", self.config.connect_timeout))?
        .with_context(|| format!("Failed to connect to {}", self.config.ws_url))?;

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        socket
            .send(Message::Text(subscribe_request(&self.config.symbols, id)))
            .await
            .context("Failed to send SUBSCRIBE")?;
        info!("Subscribed to {:?} (request {})", self.config.symbols, id);

        Ok(socket)
    }

    /// Drive `socket` and every later reconnect until shutdown is signalled.
    pub async fn run(&self, socket: FeedSocket, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut current = Some(socket);
        loop {
            let socket = match current.take() {
                Some(socket) => socket,
                None => match self.reconnect(&mut shutdown).await {
                    Some(socket) => socket,
                    None => return Ok(()),
                },
            };

            let session = self.run_session(socket, &mut shutdown).await;
            match session.end {
                SessionEnd::Shutdown => {
                    info!("Feed session closed for shutdown");
                    return Ok(());
                }
                SessionEnd::Disconnected(reason) => {
                    // Accept-then-close loops must keep growing the backoff.
                    if session.healthy {
                        self.reconnect_stats.reset_failures();
                    }
                    self.reconnect_stats.record_failure();
                    warn!(
                        "Feed disconnected: {} (consecutive failures: {}). Reconnecting...",
                        reason,
                        self.reconnect_stats.get_consecutive_failures()
                    );
                }
            }
        }
    }

    /// Reconnect with backoff. Returns `None` if shutdown arrives first.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<FeedSocket> {
        let config = &self.config.reconnect;
        loop {
            let consecutive_failures = self.reconnect_stats.get_consecutive_failures();
            let wait = if config.should_pause(consecutive_failures) {
                error!(
                    "Circuit breaker OPENED after {} consecutive feed failures. Pausing for {:?}.",
                    consecutive_failures, config.cool_off
                );
                self.reconnect_stats.reset_failures();
                config.cool_off
            } else {
                config.calculate_delay(consecutive_failures.max(1))
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = wait_for_shutdown(shutdown) => return None,
            }

            self.reconnect_stats.record_attempt();
            match self.connect().await {
                Ok(socket) => {
                    self.reconnect_stats.record_connected();
                    self.ingestor.stats().reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "Feed reconnected (total reconnects: {})",
                        self.reconnect_stats.successful_reconnects.load(Ordering::Relaxed)
                    );
                    return Some(socket);
                }
                Err(e) => {
                    self.reconnect_stats.record_failure();
                    warn!(
                        "Feed reconnect failed (attempt {}): {:#}",
                        self.reconnect_stats.get_consecutive_failures(),
                        e
                    );
                }
            }
        }
    }

    async fn run_session(&self, socket: FeedSocket, shutdown: &mut watch::Receiver<bool>) -> SessionOutcome {
        let started = Instant::now();
        let mut published = false;
        let end = self.drive_session(socket, shutdown, &mut published).await;
        SessionOutcome {
            end,
            healthy: published || started.elapsed() >= self.config.idle_timeout,
        }
    }

    async fn drive_session(
        &self,
        socket: FeedSocket,
        shutdown: &mut watch::Receiver<bool>,
        published: &mut bool,
    ) -> SessionEnd {
        let (mut write, mut read) = socket.split();
        let mut stats_tick = interval(self.config.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle_deadline = Instant::now() + self.config.idle_timeout;

        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!("Failed to send close frame: {}", e);
                    }
                    return SessionEnd::Shutdown;
                }
                _ = stats_tick.tick() => {
                    let s = self.ingestor.stats().snapshot();
                    info!(
                        "Feed stats: frames={} parse_failures={} published={} publish_failures={} reconnects={}",
                        s.frames_received, s.parse_failures, s.published, s.publish_failures, s.reconnects
                    );
                }
                _ = sleep_until(idle_deadline) => {
                    return SessionEnd::Disconnected(format!(
                        "no frames for {:?}",
                        self.config.idle_timeout
                    ));
                }
                msg = read.next() => {
                    idle_deadline = Instant::now() + self.config.idle_timeout;
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.ingestor.handle_text(&text).await.is_some() {
                                *published = true;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                return SessionEnd::Disconnected(format!("pong failed: {}", e));
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return SessionEnd::Disconnected(format!("closed by server: {:?}", frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
                        None => return SessionEnd::Disconnected("stream ended".to_string()),
                    }
                }
            }
        }
    }
}

/// Resolves once shutdown is requested or the signal sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
