//! Per-connection session state.
//!
//! One [`Session`] exists per accepted WebSocket, created on accept and
//! destroyed on disconnect.  The read pump and the idle watchdog both touch
//! it, so mutable state sits behind a lock and multi-field reads go through
//! [`Session::snapshot`].

use chrono::{DateTime, Utc};
use sc_auth::Identity;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct SessionData {
    authenticated: bool,
    identity: Option<Identity>,
    current_room_id: Option<String>,
    is_broadcaster: bool,
    last_active_at: Option<DateTime<Utc>>,
}

/// A point-in-time copy of the mutable session fields.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub identity: Option<Identity>,
    pub current_room_id: Option<String>,
    pub is_broadcaster: bool,
    pub last_active_at: Option<DateTime<Utc>>,
}

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    data: Mutex<SessionData>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            data: Mutex::new(SessionData::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionData> {
        self.data.lock().expect("session lock poisoned")
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let data = self.lock();
        SessionSnapshot {
            authenticated: data.authenticated,
            identity: data.identity.clone(),
            current_room_id: data.current_room_id.clone(),
            is_broadcaster: data.is_broadcaster,
            last_active_at: data.last_active_at,
        }
    }

    pub fn authenticate(&self, identity: Identity) {
        let mut data = self.lock();
        data.authenticated = true;
        data.identity = Some(identity);
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().authenticated
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn current_room(&self) -> Option<String> {
        self.lock().current_room_id.clone()
    }

    pub fn enter_room(&self, room_id: &str) {
        self.lock().current_room_id = Some(room_id.to_owned());
    }

    pub fn leave_room(&self) {
        let mut data = self.lock();
        data.current_room_id = None;
        data.is_broadcaster = false;
    }

    pub fn set_broadcaster(&self, broadcasting: bool) {
        self.lock().is_broadcaster = broadcasting;
    }

    pub fn is_broadcaster(&self) -> bool {
        self.lock().is_broadcaster
    }

    /// Record inbound activity; every frame from the client counts.
    pub fn touch(&self) {
        self.lock().last_active_at = Some(Utc::now());
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
