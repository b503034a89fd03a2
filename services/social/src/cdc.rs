//! Follow-table change record handling.
//!
//! Records arrive at least once, so duplicates happen; conditional cache
//! mutations bound the damage to warm keys, and the reconciler repairs any
//! drift on its next pass.  Snapshot records (`op = r`) are skipped
//! entirely — warming the cache is the reconciler's job.
//!
//! | op | condition                | action                          |
//! |----|--------------------------|---------------------------------|
//! | r  | any                      | skip                            |
//! | c  | after present            | cond_incr(after.following_id)   |
//! | u  | after.deleted_at set     | cond_decr(after.following_id)   |
//! | u  | after.deleted_at null    | cond_incr(after.following_id)   |
//! | d  | before present           | cond_decr(before.following_id)  |

use crate::cache::{CondOutcome, FollowCounts};
use sc_protocol::ChangeEnvelope;
use tracing::{debug, warn};

/// What one change record did to the cache.  The poll loop commits offsets
/// regardless; this exists for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// Snapshot, undecodable, incomplete, or unknown op.
    Skipped,
    Incremented(i64, CondOutcome),
    Decremented(i64, CondOutcome),
}

pub async fn handle_record(payload: &[u8], counts: &dyn FollowCounts) -> ChangeAction {
    let envelope: ChangeEnvelope = match serde_json::from_slice(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "skipping undecodable change record");
            return ChangeAction::Skipped;
        }
    };
    let change = envelope.payload;

    match change.op.as_str() {
        // Snapshot reads carry no delta; the reconciler owns warm-up.
        "r" => ChangeAction::Skipped,
        "c" => match change.after {
            Some(after) => incr(counts, after.following_id).await,
            None => {
                warn!("create record without after image, skipping");
                ChangeAction::Skipped
            }
        },
        "u" => match change.after {
            Some(after) if after.deleted_at.is_some() => decr(counts, after.following_id).await,
            Some(after) => incr(counts, after.following_id).await,
            None => {
                warn!("update record without after image, skipping");
                ChangeAction::Skipped
            }
        },
        "d" => match change.before {
            Some(before) => decr(counts, before.following_id).await,
            None => {
                // The table must be configured to emit full before images;
                // without one the delete cannot be attributed.
                warn!("delete record without before image, skipping");
                ChangeAction::Skipped
            }
        },
        other => {
            warn!(op = %other, "unknown change op, skipping");
            ChangeAction::Skipped
        }
    }
}

async fn incr(counts: &dyn FollowCounts, user_id: i64) -> ChangeAction {
    match counts.cond_incr(user_id).await {
        Ok(outcome) => {
            debug!(user_id, ?outcome, "follower count incremented");
            ChangeAction::Incremented(user_id, outcome)
        }
        Err(e) => {
            warn!(user_id, error = %e, "cache increment failed, dropping record");
            ChangeAction::Skipped
        }
    }
}

async fn decr(counts: &dyn FollowCounts, user_id: i64) -> ChangeAction {
    match counts.cond_decr(user_id).await {
        Ok(outcome) => {
            debug!(user_id, ?outcome, "follower count decremented");
            ChangeAction::Decremented(user_id, outcome)
        }
        Err(e) => {
            warn!(user_id, error = %e, "cache decrement failed, dropping record");
            ChangeAction::Skipped
        }
    }
}
