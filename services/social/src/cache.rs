//! Follower-count cache with conditional mutations and a hot-key scoreboard.
//!
//! Counts live at `followers:{user_id}`.  The conditional increment and
//! decrement only fire when the key already exists — change events must
//! never manufacture a warm entry, or the warm set would grow without bound
//! and mostly hold stale values.  Only read-through population and the
//! reconciler create keys.  The decrement additionally refuses to take a
//! count below zero.
//!
//! Both conditions are evaluated atomically on the store (Lua scripts on
//! Redis); the in-memory implementation mirrors the exact semantics for
//! tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

pub const HOT_KEY_SET: &str = "hot-keys";

fn count_key(user_id: i64) -> String {
    format!("followers:{user_id}")
}

/// Result of a conditional counter mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOutcome {
    /// Key existed; carries the post-mutation value.
    Applied(i64),
    /// Key absent; nothing written.
    Cold,
    /// Decrement refused: the count was already at zero.
    Floored,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend: {0}")]
    Backend(#[from] redis::RedisError),
}

#[async_trait]
pub trait FollowCounts: Send + Sync {
    async fn get_count(&self, user_id: i64) -> Result<Option<i64>, CacheError>;

    /// Unconditional write with a TTL; the only way a key becomes warm.
    async fn set_count(&self, user_id: i64, count: i64, ttl: Duration) -> Result<(), CacheError>;

    async fn cond_incr(&self, user_id: i64) -> Result<CondOutcome, CacheError>;
    async fn cond_decr(&self, user_id: i64) -> Result<CondOutcome, CacheError>;

    /// Bump the user's hot-key score by one.
    async fn record_access(&self, user_id: i64) -> Result<(), CacheError>;

    /// The `n` highest-scored users, hottest first.
    async fn top_n(&self, n: usize) -> Result<Vec<i64>, CacheError>;

    /// Drop the whole scoreboard.
    async fn reset_hot_keys(&self) -> Result<(), CacheError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

const COND_INCR_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
return redis.call('INCR', KEYS[1])";

const COND_DECR_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
local current = tonumber(redis.call('GET', KEYS[1]))
if current <= 0 then return -2 end
return redis.call('DECR', KEYS[1])";

pub struct RedisCounts {
    client: redis::Client,
    conn: Mutex<Option<redis::aio::MultiplexedConnection>>,
    cond_incr: redis::Script,
    cond_decr: redis::Script,
}

impl RedisCounts {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            conn: Mutex::new(None),
            cond_incr: redis::Script::new(COND_INCR_SCRIPT),
            cond_decr: redis::Script::new(COND_DECR_SCRIPT),
        })
    }

    async fn shared_conn(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn decode_cond(value: i64) -> CondOutcome {
        match value {
            -1 => CondOutcome::Cold,
            -2 => CondOutcome::Floored,
            applied => CondOutcome::Applied(applied),
        }
    }
}

#[async_trait]
impl FollowCounts for RedisCounts {
    async fn get_count(&self, user_id: i64) -> Result<Option<i64>, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.shared_conn().await?;
        Ok(conn.get::<_, Option<i64>>(count_key(user_id)).await?)
    }

    async fn set_count(&self, user_id: i64, count: i64, ttl: Duration) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.shared_conn().await?;
        let _: () = conn
            .set_ex(count_key(user_id), count, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn cond_incr(&self, user_id: i64) -> Result<CondOutcome, CacheError> {
        let mut conn = self.shared_conn().await?;
        let value: i64 = self
            .cond_incr
            .key(count_key(user_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(Self::decode_cond(value))
    }

    async fn cond_decr(&self, user_id: i64) -> Result<CondOutcome, CacheError> {
        let mut conn = self.shared_conn().await?;
        let value: i64 = self
            .cond_decr
            .key(count_key(user_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(Self::decode_cond(value))
    }

    async fn record_access(&self, user_id: i64) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.shared_conn().await?;
        let _: f64 = conn.zincr(HOT_KEY_SET, user_id, 1).await?;
        Ok(())
    }

    async fn top_n(&self, n: usize) -> Result<Vec<i64>, CacheError> {
        use redis::AsyncCommands;
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.shared_conn().await?;
        let stop = isize::try_from(n).unwrap_or(isize::MAX) - 1;
        Ok(conn.zrevrange(HOT_KEY_SET, 0, stop).await?)
    }

    async fn reset_hot_keys(&self) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.shared_conn().await?;
        let _: () = conn.del(HOT_KEY_SET).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, local development)
// ---------------------------------------------------------------------------

/// Same conditional semantics over process-local maps.  TTLs are accepted
/// and ignored; suites that need expiry drive it explicitly.
#[derive(Default)]
pub struct MemoryCounts {
    counts: Mutex<HashMap<i64, i64>>,
    scores: Mutex<HashMap<i64, i64>>,
}

impl MemoryCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a warm key, as TTL expiry or eviction would.
    pub async fn evict(&self, user_id: i64) {
        self.counts.lock().await.remove(&user_id);
    }
}

#[async_trait]
impl FollowCounts for MemoryCounts {
    async fn get_count(&self, user_id: i64) -> Result<Option<i64>, CacheError> {
        Ok(self.counts.lock().await.get(&user_id).copied())
    }

    async fn set_count(&self, user_id: i64, count: i64, _ttl: Duration) -> Result<(), CacheError> {
        self.counts.lock().await.insert(user_id, count);
        Ok(())
    }

    async fn cond_incr(&self, user_id: i64) -> Result<CondOutcome, CacheError> {
        let mut counts = self.counts.lock().await;
        match counts.get_mut(&user_id) {
            None => Ok(CondOutcome::Cold),
            Some(count) => {
                *count += 1;
                Ok(CondOutcome::Applied(*count))
            }
        }
    }

    async fn cond_decr(&self, user_id: i64) -> Result<CondOutcome, CacheError> {
        let mut counts = self.counts.lock().await;
        match counts.get_mut(&user_id) {
            None => Ok(CondOutcome::Cold),
            Some(count) if *count <= 0 => Ok(CondOutcome::Floored),
            Some(count) => {
                *count -= 1;
                Ok(CondOutcome::Applied(*count))
            }
        }
    }

    async fn record_access(&self, user_id: i64) -> Result<(), CacheError> {
        *self.scores.lock().await.entry(user_id).or_insert(0) += 1;
        Ok(())
    }

    async fn top_n(&self, n: usize) -> Result<Vec<i64>, CacheError> {
        let scores = self.scores.lock().await;
        let mut ranked: Vec<(i64, i64)> = scores.iter().map(|(u, s)| (*u, *s)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(n).map(|(user, _)| user).collect())
    }

    async fn reset_hot_keys(&self) -> Result<(), CacheError> {
        self.scores.lock().await.clear();
        Ok(())
    }
}
