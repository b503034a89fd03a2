//! Shared session registry: `(room, session)` -> owning-instance address.
//!
//! The WebSocket instance that accepts a session registers itself here on
//! join and unregisters on leave or disconnect.  Entries carry a TTL so a
//! crashed instance's claims age out on their own.  Lookup is eventually
//! consistent; a missing entry is the [`Resolution::NotRegistered`] value,
//! not an error — callers drop the message and move on.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The instance address currently claiming the session.
    Address(String),
    /// No live claim for this `(room, session)` pair.
    NotRegistered,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry backend: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("registry lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Atomic register/unregister/lookup over the shared store.
///
/// `register` refreshes the TTL every time it is called, so a periodic
/// re-register from the owning instance doubles as the keepalive.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(
        &self,
        room_id: &str,
        session_id: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError>;

    async fn unregister(&self, room_id: &str, session_id: &str) -> Result<(), RegistryError>;

    async fn lookup(&self, room_id: &str, session_id: &str) -> Result<Resolution, RegistryError>;
}

fn entry_key(prefix: &str, room_id: &str, session_id: &str) -> String {
    format!("{prefix}:{room_id}:{session_id}")
}

// ---------------------------------------------------------------------------
// Redis-backed implementation
// ---------------------------------------------------------------------------

/// Registry over a shared Redis, keys `{prefix}:{room}:{session}`.
pub struct RedisRegistry {
    client: redis::Client,
    /// Lazily established multiplexed connection, shared by all operations.
    conn: Mutex<Option<redis::aio::MultiplexedConnection>>,
    prefix: String,
    lookup_timeout: Duration,
}

impl RedisRegistry {
    pub fn new(
        redis_url: &str,
        prefix: impl Into<String>,
        lookup_timeout: Duration,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            conn: Mutex::new(None),
            prefix: prefix.into(),
            lookup_timeout,
        })
    }

    async fn shared_conn(&self) -> Result<redis::aio::MultiplexedConnection, RegistryError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the shared connection so the next operation redials.
    async fn invalidate_conn(&self) {
        *self.conn.lock().await = None;
    }
}

#[async_trait]
impl Registry for RedisRegistry {
    async fn register(
        &self,
        room_id: &str,
        session_id: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        use redis::AsyncCommands;

        let key = entry_key(&self.prefix, room_id, session_id);
        let mut conn = self.shared_conn().await?;
        let result: Result<(), redis::RedisError> =
            conn.set_ex(&key, address, ttl.as_secs().max(1)).await;
        if let Err(e) = result {
            self.invalidate_conn().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn unregister(&self, room_id: &str, session_id: &str) -> Result<(), RegistryError> {
        use redis::AsyncCommands;

        let key = entry_key(&self.prefix, room_id, session_id);
        let mut conn = self.shared_conn().await?;
        let result: Result<(), redis::RedisError> = conn.del(&key).await;
        if let Err(e) = result {
            self.invalidate_conn().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn lookup(&self, room_id: &str, session_id: &str) -> Result<Resolution, RegistryError> {
        use redis::AsyncCommands;

        let key = entry_key(&self.prefix, room_id, session_id);
        let mut conn = self.shared_conn().await?;
        let fetch = conn.get::<_, Option<String>>(&key);
        match tokio::time::timeout(self.lookup_timeout, fetch).await {
            Err(_elapsed) => Err(RegistryError::Timeout(self.lookup_timeout)),
            Ok(Err(e)) => {
                self.invalidate_conn().await;
                Err(e.into())
            }
            Ok(Ok(Some(address))) => Ok(Resolution::Address(address)),
            Ok(Ok(None)) => Ok(Resolution::NotRegistered),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, single-node development)
// ---------------------------------------------------------------------------

/// Registry over a local map, honoring TTLs against the tokio clock.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: Mutex<HashMap<(String, String), (String, Instant)>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired claims as `(room, session, address)` tuples, for suites
    /// that need to observe registration side effects.
    pub async fn claims(&self) -> Vec<(String, String, String)> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(_, (_, expires_at))| *expires_at > now)
            .map(|((room, session), (address, _))| (room.clone(), session.clone(), address.clone()))
            .collect()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(
        &self,
        room_id: &str,
        session_id: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        self.entries.lock().await.insert(
            (room_id.to_owned(), session_id.to_owned()),
            (address.to_owned(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn unregister(&self, room_id: &str, session_id: &str) -> Result<(), RegistryError> {
        self.entries
            .lock()
            .await
            .remove(&(room_id.to_owned(), session_id.to_owned()));
        Ok(())
    }

    async fn lookup(&self, room_id: &str, session_id: &str) -> Result<Resolution, RegistryError> {
        let mut entries = self.entries.lock().await;
        let key = (room_id.to_owned(), session_id.to_owned());
        match entries.get(&key) {
            Some((address, expires_at)) if *expires_at > Instant::now() => {
                Ok(Resolution::Address(address.clone()))
            }
            Some(_) => {
                // Expired claim: prune on read.
                entries.remove(&key);
                Ok(Resolution::NotRegistered)
            }
            None => Ok(Resolution::NotRegistered),
        }
    }
}
