//! Address-keyed pool of delivery channels.
//!
//! Each entry is one persistent WebSocket connection to a signaling
//! instance's delivery endpoint.  Channels are dialled lazily on first use
//! and reused until they fail or sit idle past `idle_timeout`.
//!
//! # Contracts
//! - At most one entry per address at any instant.  Concurrent first calls
//!   race to dial; the first insertion wins and later dialers close their
//!   fresh connection.
//! - Any failed call (transport error, deadline, error frame) evicts the
//!   entry, so the next call redials.  The pool never retries; retry policy
//!   belongs to callers.
//! - An eviction loop ticks every `idle_timeout / 2` and closes entries
//!   whose last use is older than `idle_timeout`.

use futures_util::{SinkExt, StreamExt};
use sc_protocol::{DeliverMessage, DeliverResult, DeliveryFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DeliverError {
    #[error("delivery endpoint {address} unavailable: {reason}")]
    Unavailable { address: String, reason: String },
    #[error("delivery call to {address} exceeded {deadline:?}")]
    DeadlineExceeded { address: String, deadline: Duration },
    #[error("delivery channel to {address} broke: {reason}")]
    Transport { address: String, reason: String },
    #[error("delivery endpoint {address} refused: {code}: {message}")]
    Rejected {
        address: String,
        code: String,
        message: String,
    },
    #[error("pool is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct DeliveryConn {
    ws: WsStream,
}

impl DeliveryConn {
    async fn dial(address: &str, timeout: Duration) -> Result<Self, DeliverError> {
        let url = format!("ws://{address}/ws/v1/delivery");
        let connect = tokio_tungstenite::connect_async(url.as_str());
        match tokio::time::timeout(timeout, connect).await {
            Err(_elapsed) => Err(DeliverError::Unavailable {
                address: address.to_owned(),
                reason: format!("dial timed out after {timeout:?}"),
            }),
            Ok(Err(e)) => Err(DeliverError::Unavailable {
                address: address.to_owned(),
                reason: e.to_string(),
            }),
            Ok(Ok((ws, _response))) => Ok(Self { ws }),
        }
    }

    /// One request/response exchange.  The caller bounds the whole call with
    /// a deadline, so this loop itself never times out.
    async fn call(
        &mut self,
        address: &str,
        request: DeliverMessage,
    ) -> Result<DeliverResult, DeliverError> {
        let transport = |reason: String| DeliverError::Transport {
            address: address.to_owned(),
            reason,
        };

        let json = serde_json::to_string(&DeliveryFrame::DeliverMessage(request))
            .map_err(|e| transport(e.to_string()))?;
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| transport(e.to_string()))?;

        loop {
            match self.ws.next().await {
                None => return Err(transport("connection closed".to_owned())),
                Some(Err(e)) => return Err(transport(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    let frame: DeliveryFrame =
                        serde_json::from_str(&text).map_err(|e| transport(e.to_string()))?;
                    match frame {
                        DeliveryFrame::DeliverResult(result) => return Ok(result),
                        DeliveryFrame::Error(e) => {
                            return Err(DeliverError::Rejected {
                                address: address.to_owned(),
                                code: e.code,
                                message: e.message,
                            });
                        }
                        DeliveryFrame::DeliverMessage(_) => {
                            return Err(transport("unexpected request frame".to_owned()));
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(transport("connection closed".to_owned()));
                }
                Some(Ok(_)) => {}
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ---------------------------------------------------------------------------
// Pool entry
// ---------------------------------------------------------------------------

struct Entry {
    address: String,
    conn: tokio::sync::Mutex<DeliveryConn>,
    last_used: std::sync::Mutex<Instant>,
}

impl Entry {
    fn new(address: &str, conn: DeliveryConn) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_owned(),
            conn: tokio::sync::Mutex::new(conn),
            last_used: std::sync::Mutex::new(Instant::now()),
        })
    }

    fn touch(&self) {
        *self.last_used.lock().expect("last_used lock poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .expect("last_used lock poisoned")
            .elapsed()
    }

    async fn close(&self) {
        self.conn.lock().await.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub dial_timeout: Duration,
    pub call_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

pub struct DeliveryPool {
    entries: Arc<dashmap::DashMap<String, Arc<Entry>>>,
    config: PoolConfig,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    evictor: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DeliveryPool {
    pub fn new(config: PoolConfig) -> Self {
        let entries: Arc<dashmap::DashMap<String, Arc<Entry>>> = Arc::new(dashmap::DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let evictor = tokio::spawn(eviction_loop(
            entries.clone(),
            config.idle_timeout,
            shutdown_rx,
        ));
        Self {
            entries,
            config,
            closed: AtomicBool::new(false),
            shutdown_tx,
            evictor: std::sync::Mutex::new(Some(evictor)),
        }
    }

    /// Deliver one request to `address`, dialling if no channel exists yet.
    pub async fn deliver(
        &self,
        address: &str,
        request: DeliverMessage,
    ) -> Result<DeliverResult, DeliverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliverError::Closed);
        }

        let entry = self.get_or_dial(address).await?;
        let mut conn = entry.conn.lock().await;
        entry.touch();

        let deadline = self.config.call_timeout;
        match tokio::time::timeout(deadline, conn.call(address, request)).await {
            Ok(Ok(result)) => {
                entry.touch();
                Ok(result)
            }
            Ok(Err(e)) => {
                conn.shutdown().await;
                drop(conn);
                self.evict(&entry);
                Err(e)
            }
            Err(_elapsed) => {
                conn.shutdown().await;
                drop(conn);
                self.evict(&entry);
                Err(DeliverError::DeadlineExceeded {
                    address: address.to_owned(),
                    deadline,
                })
            }
        }
    }

    /// Number of live entries (one per address).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Idempotent: stop the eviction ticker and close every entry.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let evictor = self.evictor.lock().expect("evictor lock poisoned").take();
        if let Some(handle) = evictor {
            let _ = handle.await;
        }

        let addresses: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for address in addresses {
            if let Some((_, entry)) = self.entries.remove(&address) {
                entry.close().await;
            }
        }
        info!("delivery pool closed");
    }

    async fn get_or_dial(&self, address: &str) -> Result<Arc<Entry>, DeliverError> {
        if let Some(existing) = self.entries.get(address) {
            return Ok(existing.clone());
        }

        // Dial outside the map so slow handshakes never block other addresses.
        let conn = DeliveryConn::dial(address, self.config.dial_timeout).await?;
        let fresh = Entry::new(address, conn);

        match self.entries.entry(address.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                // Lost the publish race: another dialer inserted first.
                let winner = occupied.get().clone();
                drop(occupied);
                fresh.close().await;
                debug!(address, "concurrent dial collapsed onto existing channel");
                Ok(winner)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(fresh.clone());
                debug!(address, "delivery channel established");
                Ok(fresh)
            }
        }
    }

    /// Remove `entry` from the index, but only if it is still the current
    /// occupant — a replacement dialled meanwhile must survive.
    fn evict(&self, entry: &Arc<Entry>) {
        let removed = self
            .entries
            .remove_if(&entry.address, |_, current| Arc::ptr_eq(current, entry));
        if removed.is_some() {
            debug!(address = %entry.address, "evicted failed delivery channel");
        }
    }
}

async fn eviction_loop(
    entries: Arc<dashmap::DashMap<String, Arc<Entry>>>,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = (idle_timeout / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let stale: Vec<Arc<Entry>> = entries
                    .iter()
                    .filter(|e| e.value().idle_for() > idle_timeout)
                    .map(|e| e.value().clone())
                    .collect();
                for entry in stale {
                    let removed = entries
                        .remove_if(&entry.address, |_, current| Arc::ptr_eq(current, &entry));
                    if removed.is_some() {
                        debug!(address = %entry.address, idle = ?entry.idle_for(), "closing idle delivery channel");
                        entry.close().await;
                    }
                }
            }
        }
    }
}

impl Drop for DeliveryPool {
    fn drop(&mut self) {
        // Entries drop their sockets with the map; the ticker just needs to
        // stop if close() was never called.
        if !self.closed.load(Ordering::SeqCst) {
            warn!("delivery pool dropped without close()");
            let _ = self.shutdown_tx.send(true);
        }
    }
}
