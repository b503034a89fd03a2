//! Follow repository: the authoritative store for the social graph.
//!
//! The follows table soft-deletes: unfollow stamps `deleted_at`, re-follow
//! clears it on the same row, and a partial unique index over
//! `(follower_id, following_id) WHERE deleted_at IS NULL` guarantees at most
//! one active row per pair while letting dead rows accumulate as history.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    /// A new active row exists (fresh insert or soft-restore).
    Created,
    AlreadyFollowing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfollowOutcome {
    Removed,
    NotFollowing,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// Active follower count for a user (ground truth for the cache).
    async fn follower_count(&self, user_id: i64) -> Result<i64, RepoError>;

    async fn follow(&self, follower_id: i64, following_id: i64) -> Result<FollowOutcome, RepoError>;

    async fn unfollow(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<UnfollowOutcome, RepoError>;

    /// For each target: does `follower_id` actively follow it?
    async fn following_status(
        &self,
        follower_id: i64,
        target_ids: &[i64],
    ) -> Result<HashMap<i64, bool>, RepoError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgFollowRepo {
    pool: PgPool,
}

impl PgFollowRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

#[async_trait]
impl FollowRepo for PgFollowRepo {
    async fn follower_count(&self, user_id: i64) -> Result<i64, RepoError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM follows WHERE following_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }

    async fn follow(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<FollowOutcome, RepoError> {
        let mut tx = self.pool.begin().await?;

        let active = sqlx::query(
            "SELECT 1 FROM follows
             WHERE follower_id = $1 AND following_id = $2 AND deleted_at IS NULL",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_optional(&mut *tx)
        .await?;
        if active.is_some() {
            return Ok(FollowOutcome::AlreadyFollowing);
        }

        // Re-follow reactivates the most recent dead row instead of writing
        // a new one, preserving the pair's identity.
        let restored = sqlx::query(
            "UPDATE follows SET deleted_at = NULL
             WHERE id = (
                 SELECT id FROM follows
                 WHERE follower_id = $1 AND following_id = $2 AND deleted_at IS NOT NULL
                 ORDER BY created_at DESC
                 LIMIT 1
             )
             RETURNING id",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_optional(&mut *tx)
        .await?;
        if restored.is_some() {
            tx.commit().await?;
            return Ok(FollowOutcome::Created);
        }

        let inserted = sqlx::query(
            "INSERT INTO follows (follower_id, following_id) VALUES ($1, $2)",
        )
        .bind(follower_id)
        .bind(following_id)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(FollowOutcome::Created)
            }
            // A racing follow hit the partial unique index first.
            Err(e) if is_unique_violation(&e) => Ok(FollowOutcome::AlreadyFollowing),
            Err(e) => Err(e.into()),
        }
    }

    async fn unfollow(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<UnfollowOutcome, RepoError> {
        let result = sqlx::query(
            "UPDATE follows SET deleted_at = NOW()
             WHERE follower_id = $1 AND following_id = $2 AND deleted_at IS NULL",
        )
        .bind(follower_id)
        .bind(following_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            Ok(UnfollowOutcome::Removed)
        } else {
            Ok(UnfollowOutcome::NotFollowing)
        }
    }

    async fn following_status(
        &self,
        follower_id: i64,
        target_ids: &[i64],
    ) -> Result<HashMap<i64, bool>, RepoError> {
        let mut results: HashMap<i64, bool> =
            target_ids.iter().map(|id| (*id, false)).collect();
        if target_ids.is_empty() {
            return Ok(results);
        }

        let rows = sqlx::query(
            "SELECT following_id FROM follows
             WHERE follower_id = $1 AND following_id = ANY($2) AND deleted_at IS NULL",
        )
        .bind(follower_id)
        .bind(target_ids)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            results.insert(row.get("following_id"), true);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, local development)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryRow {
    follower_id: i64,
    following_id: i64,
    deleted: bool,
}

/// Same soft-delete semantics over a process-local table.
#[derive(Default)]
pub struct MemoryFollowRepo {
    rows: Mutex<Vec<MemoryRow>>,
}

impl MemoryFollowRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an active follow edge without going through `follow`.
    pub async fn seed(&self, follower_id: i64, following_id: i64) {
        self.rows.lock().await.push(MemoryRow {
            follower_id,
            following_id,
            deleted: false,
        });
    }

    /// Total rows for a pair, dead ones included.
    pub async fn row_count(&self, follower_id: i64, following_id: i64) -> usize {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|r| r.follower_id == follower_id && r.following_id == following_id)
            .count()
    }

    /// Active rows for a pair; the partial unique index bounds this at one.
    pub async fn active_row_count(&self, follower_id: i64, following_id: i64) -> usize {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|r| r.follower_id == follower_id && r.following_id == following_id && !r.deleted)
            .count()
    }
}

#[async_trait]
impl FollowRepo for MemoryFollowRepo {
    async fn follower_count(&self, user_id: i64) -> Result<i64, RepoError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|r| r.following_id == user_id && !r.deleted)
            .count() as i64)
    }

    async fn follow(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<FollowOutcome, RepoError> {
        let mut rows = self.rows.lock().await;
        if rows
            .iter()
            .any(|r| r.follower_id == follower_id && r.following_id == following_id && !r.deleted)
        {
            return Ok(FollowOutcome::AlreadyFollowing);
        }
        if let Some(dead) = rows
            .iter_mut()
            .find(|r| r.follower_id == follower_id && r.following_id == following_id && r.deleted)
        {
            dead.deleted = false;
            return Ok(FollowOutcome::Created);
        }
        rows.push(MemoryRow {
            follower_id,
            following_id,
            deleted: false,
        });
        Ok(FollowOutcome::Created)
    }

    async fn unfollow(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<UnfollowOutcome, RepoError> {
        let mut rows = self.rows.lock().await;
        match rows
            .iter_mut()
            .find(|r| r.follower_id == follower_id && r.following_id == following_id && !r.deleted)
        {
            Some(row) => {
                row.deleted = true;
                Ok(UnfollowOutcome::Removed)
            }
            None => Ok(UnfollowOutcome::NotFollowing),
        }
    }

    async fn following_status(
        &self,
        follower_id: i64,
        target_ids: &[i64],
    ) -> Result<HashMap<i64, bool>, RepoError> {
        let rows = self.rows.lock().await;
        Ok(target_ids
            .iter()
            .map(|target| {
                let following = rows.iter().any(|r| {
                    r.follower_id == follower_id && r.following_id == *target && !r.deleted
                });
                (*target, following)
            })
            .collect())
    }
}
