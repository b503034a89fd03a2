//! Shared application state for the signaling service.

use crate::events::BroadcastEvents;
use crate::hub::Hub;
use crate::live::LiveRooms;
use crate::directory::{MediaIngest, RoomDirectory};
use crate::session::Session;
use sc_auth::TokenVerifier;
use sc_registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// WebSocket framing knobs.
#[derive(Debug, Clone)]
pub struct WsTuning {
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_message_size: usize,
    /// Outbound frames buffered per client before it counts as slow.
    pub outbound_buffer: usize,
}

impl Default for WsTuning {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            pong_wait: Duration::from_secs(45),
            write_wait: Duration::from_secs(5),
            max_message_size: 64 * 1024,
            outbound_buffer: 64,
        }
    }
}

/// Idle-broadcast enforcement knobs.
#[derive(Debug, Clone)]
pub struct BroadcastTuning {
    pub heartbeat_timeout: Duration,
    pub grace_period: Duration,
    pub watchdog_interval: Duration,
}

impl Default for BroadcastTuning {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(15),
            watchdog_interval: Duration::from_secs(5),
        }
    }
}

/// How this instance presents itself to the rest of the platform.
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    /// The `host:port` other services dial for delivery; what we write into
    /// the registry.
    pub advertised_address: String,
    /// TTL for registry claims; refreshed on every join.
    pub session_ttl: Duration,
    pub ws: WsTuning,
    pub broadcast: BroadcastTuning,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            advertised_address: "127.0.0.1:7400".to_owned(),
            session_ttl: Duration::from_secs(60),
            ws: WsTuning::default(),
            broadcast: BroadcastTuning::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub options: Arc<InstanceOptions>,
    pub hub: Arc<Hub>,
    pub live: Arc<LiveRooms>,
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub ingest: Arc<dyn MediaIngest>,
    pub events: Arc<dyn BroadcastEvents>,
    pub registry: Arc<dyn Registry>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: InstanceOptions,
        verifier: Arc<dyn TokenVerifier>,
        rooms: Arc<dyn RoomDirectory>,
        ingest: Arc<dyn MediaIngest>,
        events: Arc<dyn BroadcastEvents>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            hub: Hub::new(),
            live: LiveRooms::new(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            verifier,
            rooms,
            ingest,
            events,
            registry,
        }
    }

    pub async fn track_session(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    pub async fn untrack_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
