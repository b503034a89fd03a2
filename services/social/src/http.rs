//! Follow HTTP API.
//!
//! Reads are public and cache-backed; mutations require a bearer token and
//! go straight to the authoritative store (the cache catches up via change
//! records and the reconciler).  Mutating responses use the
//! `{success, data | error}` envelope.

use crate::cache::FollowCounts;
use crate::repo::{FollowOutcome, FollowRepo, UnfollowOutcome};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sc_auth::TokenVerifier;
use sc_protocol::{ApiResponse, FollowerCount, FollowingStatusRequest, FollowingStatusResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct SocialState {
    pub counts: Arc<dyn FollowCounts>,
    pub repo: Arc<dyn FollowRepo>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub cache_ttl: Duration,
}

#[derive(Debug, Serialize)]
struct FollowState {
    following: bool,
}

fn envelope_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse::<FollowState>::err(code, message)),
    )
        .into_response()
}

fn unauthorized(message: impl Into<String>) -> Response {
    envelope_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

fn internal_error(message: impl Into<String>) -> Response {
    envelope_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
}

/// Resolve the caller's user id from the bearer token.
async fn authed_user(state: &SocialState, headers: &HeaderMap) -> Result<i64, Response> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| unauthorized("missing bearer token"))?;

    let identity = match state.verifier.verify(token).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return Err(unauthorized("invalid or expired token")),
        Err(e) => {
            warn!(error = %e, "token verification unavailable");
            return Err(internal_error("authentication unavailable"));
        }
    };

    identity
        .user_id
        .parse::<i64>()
        .map_err(|_| unauthorized("token subject is not a user id"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /api/v1/users/{id}/followers/count` — read-through cached count.
pub async fn get_followers_count(
    State(state): State<SocialState>,
    Path(user_id): Path<i64>,
) -> Response {
    let cached = match state.counts.get_count(user_id).await {
        Ok(cached) => cached,
        Err(e) => {
            warn!(user_id, error = %e, "count cache read failed");
            None
        }
    };

    let count = match cached {
        Some(count) => count,
        None => {
            let count = match state.repo.follower_count(user_id).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(user_id, error = %e, "follower count read failed");
                    return internal_error("follower count unavailable");
                }
            };
            if let Err(e) = state
                .counts
                .set_count(user_id, count, state.cache_ttl)
                .await
            {
                warn!(user_id, error = %e, "count cache populate failed");
            }
            count
        }
    };

    // Every read is demand, hit or miss; the reconciler keys off this.
    if let Err(e) = state.counts.record_access(user_id).await {
        warn!(user_id, error = %e, "hot-key record failed");
    }

    Json(FollowerCount { count }).into_response()
}

/// `POST /api/v1/users/{id}/following/status` — bulk "does :id follow X?".
pub async fn post_following_status(
    State(state): State<SocialState>,
    Path(user_id): Path<i64>,
    Json(request): Json<FollowingStatusRequest>,
) -> Response {
    match state
        .repo
        .following_status(user_id, &request.target_ids)
        .await
    {
        Ok(results) => Json(FollowingStatusResponse {
            results: results
                .into_iter()
                .map(|(id, following)| (id.to_string(), following))
                .collect(),
        })
        .into_response(),
        Err(e) => {
            warn!(user_id, error = %e, "following status read failed");
            internal_error("following status unavailable")
        }
    }
}

/// `POST /api/v1/users/{id}/follow` — the caller follows `:id`.
pub async fn post_follow(
    State(state): State<SocialState>,
    Path(target_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let follower_id = match authed_user(&state, &headers).await {
        Ok(follower_id) => follower_id,
        Err(response) => return response,
    };
    if follower_id == target_id {
        return envelope_error(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "cannot follow yourself",
        );
    }

    match state.repo.follow(follower_id, target_id).await {
        Ok(FollowOutcome::Created) => (
            StatusCode::CREATED,
            Json(ApiResponse::ok(FollowState { following: true })),
        )
            .into_response(),
        Ok(FollowOutcome::AlreadyFollowing) => {
            envelope_error(StatusCode::CONFLICT, "CONFLICT", "already following")
        }
        Err(e) => {
            warn!(follower_id, target_id, error = %e, "follow write failed");
            internal_error("follow failed")
        }
    }
}

/// `DELETE /api/v1/users/{id}/follow` — the caller unfollows `:id`.
pub async fn delete_follow(
    State(state): State<SocialState>,
    Path(target_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let follower_id = match authed_user(&state, &headers).await {
        Ok(follower_id) => follower_id,
        Err(response) => return response,
    };

    match state.repo.unfollow(follower_id, target_id).await {
        Ok(UnfollowOutcome::Removed) => StatusCode::NO_CONTENT.into_response(),
        Ok(UnfollowOutcome::NotFollowing) => {
            envelope_error(StatusCode::CONFLICT, "CONFLICT", "not following")
        }
        Err(e) => {
            warn!(follower_id, target_id, error = %e, "unfollow write failed");
            internal_error("unfollow failed")
        }
    }
}
