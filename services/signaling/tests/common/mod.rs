//! Shared fixture for the signaling integration suites: an in-process
//! instance wired to static collaborators and in-memory event/registry
//! doubles, served on a random local port.

use sc_auth::{StaticTokenVerifier, identity};
use sc_registry::MemoryRegistry;
use signaling::directory::{StaticMediaIngest, StaticRoomDirectory};
use signaling::events::MemoryBroadcastEvents;
use signaling::state::{AppState, InstanceOptions};
use std::net::SocketAddr;
use std::sync::Arc;

pub struct TestInstance {
    pub state: AppState,
    pub addr: SocketAddr,
    pub events: Arc<MemoryBroadcastEvents>,
    pub ingest: Arc<StaticMediaIngest>,
    pub registry: Arc<MemoryRegistry>,
}

impl TestInstance {
    pub fn signaling_url(&self) -> String {
        format!("ws://{}/ws/v1/signaling", self.addr)
    }

    pub fn delivery_url(&self) -> String {
        format!("ws://{}/ws/v1/delivery", self.addr)
    }
}

/// Instance with one room `r-1` owned by `u-owner`; tokens `tok-owner` and
/// `tok-viewer` resolve to the owner and a plain viewer.
pub async fn spawn_instance(options: InstanceOptions) -> TestInstance {
    let verifier = Arc::new(
        StaticTokenVerifier::new()
            .with_token("tok-owner", identity("u-owner", "olivia"))
            .with_token("tok-viewer", identity("u-viewer", "vera")),
    );
    let rooms = Arc::new(StaticRoomDirectory::new().with_room("r-1", "u-owner", None));
    let ingest = Arc::new(StaticMediaIngest::new());
    let events = Arc::new(MemoryBroadcastEvents::new());
    let registry = Arc::new(MemoryRegistry::new());

    let state = AppState::new(
        options,
        verifier,
        rooms,
        ingest.clone(),
        events.clone(),
        registry.clone(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let router = signaling::build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestInstance {
        state,
        addr,
        events,
        ingest,
        registry,
    }
}
