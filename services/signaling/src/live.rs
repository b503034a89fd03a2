//! Live-broadcast tracking: which rooms are on air, who holds them, and how
//! fresh the broadcaster's signaling traffic is.
//!
//! Invariant: at most one broadcast per room.  [`LiveRooms::try_start`] is
//! the single admission point and rejects a second broadcaster atomically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct LiveBroadcast {
    pub room_id: String,
    pub broadcaster_id: String,
    pub session_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Last inbound signaling frame from the broadcaster's session.
    pub last_activity: Instant,
}

#[derive(Debug, thiserror::Error)]
#[error("room {room_id} already has a broadcaster")]
pub struct AlreadyLive {
    pub room_id: String,
}

#[derive(Default)]
pub struct LiveRooms {
    inner: RwLock<HashMap<String, LiveBroadcast>>,
}

impl LiveRooms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn try_start(
        &self,
        room_id: &str,
        broadcaster_id: &str,
        session_id: &str,
    ) -> Result<(), AlreadyLive> {
        let mut rooms = self.inner.write().await;
        if rooms.contains_key(room_id) {
            return Err(AlreadyLive {
                room_id: room_id.to_owned(),
            });
        }
        rooms.insert(
            room_id.to_owned(),
            LiveBroadcast {
                room_id: room_id.to_owned(),
                broadcaster_id: broadcaster_id.to_owned(),
                session_id: session_id.to_owned(),
                started_at: chrono::Utc::now(),
                last_activity: Instant::now(),
            },
        );
        Ok(())
    }

    /// End the room's broadcast, but only if `session_id` owns it.  Returns
    /// the ended broadcast, `None` if the room is not live or is held by a
    /// different session.
    pub async fn stop_if_session(&self, room_id: &str, session_id: &str) -> Option<LiveBroadcast> {
        let mut rooms = self.inner.write().await;
        match rooms.get(room_id) {
            Some(live) if live.session_id == session_id => rooms.remove(room_id),
            _ => None,
        }
    }

    pub async fn is_live(&self, room_id: &str) -> bool {
        self.inner.read().await.contains_key(room_id)
    }

    /// Refresh the broadcaster's activity clock; a no-op unless `session_id`
    /// holds the room.
    pub async fn touch(&self, room_id: &str, session_id: &str) {
        let mut rooms = self.inner.write().await;
        if let Some(live) = rooms.get_mut(room_id) {
            if live.session_id == session_id {
                live.last_activity = Instant::now();
            }
        }
    }

    /// Broadcasts whose last activity is older than `cutoff`.
    pub async fn idle_broadcasts(&self, cutoff: Duration) -> Vec<LiveBroadcast> {
        self.inner
            .read()
            .await
            .values()
            .filter(|live| live.last_activity.elapsed() > cutoff)
            .cloned()
            .collect()
    }
}
