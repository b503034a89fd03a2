//! Per-instance WebSocket hub: the client index, the room index, and the
//! fan-out path.
//!
//! The hub owns the only senders for every client's outbound channel; the
//! write pump exits when its channel closes, so removal from the indexes is
//! the client's teardown signal.  All sends are non-blocking: a client whose
//! buffer is full gets scheduled for unregistration instead of stalling the
//! sender — back-pressure here means drop, never block.
//!
//! Lock discipline: index reads/writes are brief and hold no I/O.  Slow
//! clients found during a broadcast (under the read lock) are handed to a
//! background unregistration loop rather than removed inline.

use sc_protocol::ServerFrame;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// The hub-side face of one connected client: its id and the sole sender
/// for its outbound channel.
#[derive(Clone)]
pub struct ClientHandle {
    pub id: String,
    outbound: mpsc::Sender<String>,
}

impl ClientHandle {
    pub fn new(id: impl Into<String>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: id.into(),
            outbound,
        }
    }
}

#[derive(Default)]
struct Indexes {
    clients: HashMap<String, ClientHandle>,
    rooms: HashMap<String, HashMap<String, ClientHandle>>,
    /// Which room each client is in, for O(1) cleanup on unregister.
    room_of: HashMap<String, String>,
}

pub struct Hub {
    indexes: RwLock<Indexes>,
    /// Slow/dead clients discovered mid-broadcast are queued here and
    /// unregistered by a background task.
    evict_tx: mpsc::UnboundedSender<String>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        let (evict_tx, mut evict_rx) = mpsc::unbounded_channel::<String>();
        let hub = Arc::new(Self {
            indexes: RwLock::new(Indexes::default()),
            evict_tx,
        });

        let weak = Arc::downgrade(&hub);
        tokio::spawn(async move {
            while let Some(client_id) = evict_rx.recv().await {
                let Some(hub) = weak.upgrade() else { break };
                warn!(client_id = %client_id, "unregistering slow client");
                hub.unregister(&client_id).await;
            }
        });

        hub
    }

    pub async fn register(&self, client: ClientHandle) {
        let mut indexes = self.indexes.write().await;
        debug!(client_id = %client.id, "client registered");
        indexes.clients.insert(client.id.clone(), client);
    }

    /// Remove the client from its room, then from the client index, dropping
    /// the last outbound sender.  Safe to call any number of times.
    pub async fn unregister(&self, client_id: &str) -> bool {
        let mut indexes = self.indexes.write().await;
        if let Some(room_id) = indexes.room_of.remove(client_id) {
            if let Some(members) = indexes.rooms.get_mut(&room_id) {
                members.remove(client_id);
                if members.is_empty() {
                    indexes.rooms.remove(&room_id);
                }
            }
        }
        let removed = indexes.clients.remove(client_id).is_some();
        if removed {
            debug!(client_id = %client_id, "client unregistered");
        }
        removed
    }

    /// Add a registered client to a room.  Returns the room's new size, or
    /// `None` if the client is not registered.  Membership is exclusive: a
    /// client already in another room is moved.
    pub async fn join_room(&self, client_id: &str, room_id: &str) -> Option<u64> {
        let mut indexes = self.indexes.write().await;
        let client = indexes.clients.get(client_id)?.clone();

        if let Some(previous) = indexes.room_of.insert(client_id.to_owned(), room_id.to_owned()) {
            if previous != room_id {
                if let Some(members) = indexes.rooms.get_mut(&previous) {
                    members.remove(client_id);
                    if members.is_empty() {
                        indexes.rooms.remove(&previous);
                    }
                }
            }
        }

        let members = indexes.rooms.entry(room_id.to_owned()).or_default();
        members.insert(client_id.to_owned(), client);
        Some(members.len() as u64)
    }

    /// Remove a client from a room, dropping the bucket when it empties.
    /// Returns the room's remaining size, or `None` if the client was not a
    /// member.
    pub async fn leave_room(&self, client_id: &str, room_id: &str) -> Option<u64> {
        let mut indexes = self.indexes.write().await;
        let members = indexes.rooms.get_mut(room_id)?;
        members.remove(client_id)?;
        let remaining = members.len() as u64;
        if remaining == 0 {
            indexes.rooms.remove(room_id);
        }
        indexes.room_of.remove(client_id);
        Some(remaining)
    }

    pub async fn room_size(&self, room_id: &str) -> u64 {
        self.indexes
            .read()
            .await
            .rooms
            .get(room_id)
            .map_or(0, |members| members.len() as u64)
    }

    pub async fn client_count(&self) -> usize {
        self.indexes.read().await.clients.len()
    }

    /// Fan one frame out to a room, encoding it once.  Returns how many
    /// recipients' buffers accepted it.  Clients with a full buffer are
    /// scheduled for unregistration.
    pub async fn broadcast_to_room(
        &self,
        room_id: &str,
        frame: &ServerFrame,
        exclude: Option<&str>,
    ) -> u32 {
        let Ok(json) = serde_json::to_string(frame) else {
            warn!(room_id = %room_id, "unencodable outbound frame");
            return 0;
        };

        let mut delivered = 0u32;
        let mut slow: Vec<String> = Vec::new();
        {
            let indexes = self.indexes.read().await;
            let Some(members) = indexes.rooms.get(room_id) else {
                return 0;
            };
            for (client_id, client) in members {
                if exclude == Some(client_id.as_str()) {
                    continue;
                }
                match client.outbound.try_send(json.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => slow.push(client_id.clone()),
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }

        for client_id in slow {
            let _ = self.evict_tx.send(client_id);
        }
        delivered
    }

    /// Non-blocking single-client send; `false` if the client is unknown or
    /// its buffer refused the frame (in which case it is scheduled out).
    pub async fn send_to_client(&self, client_id: &str, frame: &ServerFrame) -> bool {
        let Ok(json) = serde_json::to_string(frame) else {
            warn!(client_id = %client_id, "unencodable outbound frame");
            return false;
        };

        let client = {
            let indexes = self.indexes.read().await;
            match indexes.clients.get(client_id) {
                Some(client) => client.clone(),
                None => return false,
            }
        };

        match client.outbound.try_send(json) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.evict_tx.send(client_id.to_owned());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Tear down every client: clears all indexes, closing every outbound
    /// channel so every write pump exits.
    pub async fn stop(&self) {
        let mut indexes = self.indexes.write().await;
        let count = indexes.clients.len();
        indexes.rooms.clear();
        indexes.room_of.clear();
        indexes.clients.clear();
        info!(clients = count, "hub stopped");
    }
}
