//! Signaling state machine: one inbound frame in, zero or more outbound
//! frames and lifecycle events out.
//!
//! Session states and legal transitions:
//!
//! ```text
//! NEW -> (auth) -> AUTHENTICATED
//! AUTHENTICATED -> (join_room) -> IN_ROOM(viewer|owner)
//! IN_ROOM(viewer) -> (leave_room) -> AUTHENTICATED
//! IN_ROOM(owner) -> (start_broadcast) -> BROADCASTING
//! BROADCASTING -> (stop_broadcast) -> IN_ROOM(owner)   [stopped: explicit]
//! BROADCASTING -> (idle past cutoff) -> IN_ROOM(owner) [stopped: timeout]
//! IN_ROOM(*) -> (disconnect) -> CLOSED                 [stopped: disconnect]
//! ```
//!
//! Guards: one broadcaster per room, owner-only start.  Every inbound frame
//! refreshes the session's activity clock, which the idle watchdog reads.

use crate::session::Session;
use crate::state::AppState;
use chrono::Utc;
use sc_protocol::{BroadcastEvent, ClientFrame, ServerFrame, StopReason, error_codes};
use std::sync::Arc;
use tracing::{debug, info, warn};

async fn send(state: &AppState, session_id: &str, frame: &ServerFrame) {
    let _ = state.hub.send_to_client(session_id, frame).await;
}

async fn send_error(state: &AppState, session_id: &str, code: &str, message: impl Into<String>) {
    send(
        state,
        session_id,
        &ServerFrame::Error {
            code: code.to_owned(),
            message: message.into(),
        },
    )
    .await;
}

/// Dispatch one decoded frame against the session's current state.
pub async fn handle_frame(state: &AppState, session: &Arc<Session>, frame: ClientFrame) {
    session.touch();
    if session.is_broadcaster() {
        if let Some(room_id) = session.current_room() {
            state.live.touch(&room_id, &session.id).await;
        }
    }

    match frame {
        ClientFrame::Ping => {
            send(state, &session.id, &ServerFrame::Pong).await;
        }
        ClientFrame::Auth { token } => {
            handle_auth(state, session, &token).await;
        }
        frame if !session.is_authenticated() => {
            debug!(session_id = %session.id, ?frame, "frame before auth");
            send_error(
                state,
                &session.id,
                error_codes::UNAUTHORIZED,
                "authenticate first",
            )
            .await;
        }
        ClientFrame::JoinRoom { room_id } => {
            handle_join_room(state, session, &room_id).await;
        }
        ClientFrame::StartBroadcast { room_id, offer } => {
            handle_start_broadcast(state, session, &room_id, &offer).await;
        }
        ClientFrame::IceCandidate { room_id, candidate } => {
            handle_ice_candidate(state, session, &room_id, &candidate).await;
        }
        ClientFrame::StopBroadcast { room_id } => {
            handle_stop_broadcast(state, session, &room_id).await;
        }
        ClientFrame::LeaveRoom { room_id } => {
            handle_leave_room(state, session, &room_id).await;
        }
    }
}

async fn handle_auth(state: &AppState, session: &Arc<Session>, token: &str) {
    match state.verifier.verify(token).await {
        Ok(Some(identity)) => {
            info!(session_id = %session.id, user_id = %identity.user_id, "session authenticated");
            let frame = ServerFrame::AuthResult {
                success: true,
                user_id: Some(identity.user_id.clone()),
                username: Some(identity.username.clone()),
                message: None,
            };
            session.authenticate(identity);
            send(state, &session.id, &frame).await;
        }
        Ok(None) => {
            debug!(session_id = %session.id, "invalid token");
            send(
                state,
                &session.id,
                &ServerFrame::AuthResult {
                    success: false,
                    user_id: None,
                    username: None,
                    message: Some("invalid or expired token".to_owned()),
                },
            )
            .await;
        }
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "token verification unavailable");
            send_error(
                state,
                &session.id,
                error_codes::INTERNAL_ERROR,
                "authentication unavailable",
            )
            .await;
        }
    }
}

async fn handle_join_room(state: &AppState, session: &Arc<Session>, room_id: &str) {
    if session.current_room().is_some() {
        send_error(
            state,
            &session.id,
            error_codes::BAD_REQUEST,
            "already in a room",
        )
        .await;
        return;
    }

    let room = match state.rooms.room(room_id).await {
        Ok(Some(room)) => room,
        Ok(None) => {
            send_error(
                state,
                &session.id,
                error_codes::NOT_FOUND,
                format!("room {room_id} not found"),
            )
            .await;
            return;
        }
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "room lookup failed");
            send_error(
                state,
                &session.id,
                error_codes::INTERNAL_ERROR,
                "room service unavailable",
            )
            .await;
            return;
        }
    };

    let Some(viewer_count) = state.hub.join_room(&session.id, room_id).await else {
        send_error(
            state,
            &session.id,
            error_codes::INTERNAL_ERROR,
            "connection not registered",
        )
        .await;
        return;
    };
    session.enter_room(room_id);

    // Claim the session in the shared registry so chat routes here.  A
    // failed write only costs chat delivery, not the join.
    if let Err(e) = state
        .registry
        .register(
            room_id,
            &session.id,
            &state.options.advertised_address,
            state.options.session_ttl,
        )
        .await
    {
        warn!(room_id = %room_id, session_id = %session.id, error = %e, "registry claim failed");
    }

    let is_owner = session
        .identity()
        .is_some_and(|identity| identity.user_id == room.owner_id);
    let is_live = state.live.is_live(room_id).await;
    info!(
        session_id = %session.id,
        room_id = %room_id,
        is_owner,
        viewer_count,
        "joined room"
    );

    send(
        state,
        &session.id,
        &ServerFrame::RoomJoined {
            room_id: room_id.to_owned(),
            is_owner,
            viewer_count,
            is_live,
            hls_url: room.hls_url,
        },
    )
    .await;

    state
        .hub
        .broadcast_to_room(
            room_id,
            &ServerFrame::ViewerCount {
                room_id: room_id.to_owned(),
                count: viewer_count,
            },
            Some(&session.id),
        )
        .await;
}

async fn handle_start_broadcast(
    state: &AppState,
    session: &Arc<Session>,
    room_id: &str,
    offer: &str,
) {
    if session.current_room().as_deref() != Some(room_id) {
        send_error(
            state,
            &session.id,
            error_codes::BAD_REQUEST,
            "join the room before broadcasting",
        )
        .await;
        return;
    }

    let Some(identity) = session.identity() else {
        send_error(state, &session.id, error_codes::UNAUTHORIZED, "no identity").await;
        return;
    };

    let owns_room = match state.rooms.room(room_id).await {
        Ok(Some(room)) => room.owner_id == identity.user_id,
        Ok(None) => {
            send_error(state, &session.id, error_codes::NOT_FOUND, "room vanished").await;
            return;
        }
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "room lookup failed");
            send_error(
                state,
                &session.id,
                error_codes::INTERNAL_ERROR,
                "room service unavailable",
            )
            .await;
            return;
        }
    };
    if !owns_room {
        send_error(
            state,
            &session.id,
            error_codes::FORBIDDEN,
            "only the room owner may broadcast",
        )
        .await;
        return;
    }

    if let Err(e) = state
        .live
        .try_start(room_id, &identity.user_id, &session.id)
        .await
    {
        send_error(state, &session.id, error_codes::ALREADY_STREAMING, e.to_string()).await;
        return;
    }

    let answer = match state.ingest.start_session(room_id, offer).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "ingest refused the offer");
            // Roll the admission back so the room is startable again.
            state.live.stop_if_session(room_id, &session.id).await;
            send_error(
                state,
                &session.id,
                error_codes::INTERNAL_ERROR,
                "media ingest unavailable",
            )
            .await;
            return;
        }
    };

    session.set_broadcaster(true);
    info!(room_id = %room_id, broadcaster_id = %identity.user_id, "broadcast started");

    send(
        state,
        &session.id,
        &ServerFrame::BroadcastStarted {
            room_id: room_id.to_owned(),
            answer,
        },
    )
    .await;

    state
        .events
        .publish(BroadcastEvent::BroadcastStarted {
            room_id: room_id.to_owned(),
            broadcaster_id: identity.user_id,
            timestamp: Utc::now().timestamp(),
        })
        .await;
}

async fn handle_ice_candidate(
    state: &AppState,
    session: &Arc<Session>,
    room_id: &str,
    candidate: &serde_json::Value,
) {
    if session.current_room().as_deref() != Some(room_id) {
        send_error(state, &session.id, error_codes::BAD_REQUEST, "not in that room").await;
        return;
    }
    if let Err(e) = state.ingest.add_candidate(room_id, candidate).await {
        // Candidates are best-effort; the peer connection retries on its own.
        debug!(room_id = %room_id, error = %e, "candidate forward failed");
    }
}

async fn handle_stop_broadcast(state: &AppState, session: &Arc<Session>, room_id: &str) {
    if !state.live.is_live(room_id).await {
        send_error(state, &session.id, error_codes::ROOM_NOT_LIVE, "room is not live").await;
        return;
    }
    let Some(ended) = state.live.stop_if_session(room_id, &session.id).await else {
        send_error(
            state,
            &session.id,
            error_codes::FORBIDDEN,
            "broadcast is held by another session",
        )
        .await;
        return;
    };

    finish_broadcast(state, session, &ended.broadcaster_id, room_id, StopReason::Explicit).await;
}

async fn handle_leave_room(state: &AppState, session: &Arc<Session>, room_id: &str) {
    if session.current_room().as_deref() != Some(room_id) {
        send_error(state, &session.id, error_codes::BAD_REQUEST, "not in that room").await;
        return;
    }

    // Leaving mid-broadcast ends the broadcast first.
    if let Some(ended) = state.live.stop_if_session(room_id, &session.id).await {
        finish_broadcast(state, session, &ended.broadcaster_id, room_id, StopReason::Explicit)
            .await;
    }

    let remaining = state.hub.leave_room(&session.id, room_id).await.unwrap_or(0);
    session.leave_room();

    if let Err(e) = state.registry.unregister(room_id, &session.id).await {
        warn!(room_id = %room_id, session_id = %session.id, error = %e, "registry release failed");
    }
    info!(session_id = %session.id, room_id = %room_id, remaining, "left room");

    state
        .hub
        .broadcast_to_room(
            room_id,
            &ServerFrame::ViewerCount {
                room_id: room_id.to_owned(),
                count: remaining,
            },
            None,
        )
        .await;
}

/// Common tail of every broadcast teardown: release the ingest session,
/// clear the flag, and emit the stopped event.
async fn finish_broadcast(
    state: &AppState,
    session: &Arc<Session>,
    broadcaster_id: &str,
    room_id: &str,
    reason: StopReason,
) {
    if let Err(e) = state.ingest.stop_session(room_id).await {
        warn!(room_id = %room_id, error = %e, "ingest session release failed");
    }
    session.set_broadcaster(false);
    info!(room_id = %room_id, broadcaster_id = %broadcaster_id, ?reason, "broadcast stopped");

    state
        .events
        .publish(BroadcastEvent::BroadcastStopped {
            room_id: room_id.to_owned(),
            broadcaster_id: broadcaster_id.to_owned(),
            reason,
            timestamp: Utc::now().timestamp(),
        })
        .await;
}

/// Runs once when the socket closes, before the client is unregistered.
pub async fn handle_disconnect(state: &AppState, session: &Arc<Session>) {
    if let Some(room_id) = session.current_room() {
        if let Some(ended) = state.live.stop_if_session(&room_id, &session.id).await {
            finish_broadcast(
                state,
                session,
                &ended.broadcaster_id,
                &room_id,
                StopReason::Disconnect,
            )
            .await;
        }

        let remaining = state
            .hub
            .leave_room(&session.id, &room_id)
            .await
            .unwrap_or(0);
        if let Err(e) = state.registry.unregister(&room_id, &session.id).await {
            warn!(room_id = %room_id, session_id = %session.id, error = %e, "registry release failed");
        }
        state
            .hub
            .broadcast_to_room(
                &room_id,
                &ServerFrame::ViewerCount {
                    room_id: room_id.clone(),
                    count: remaining,
                },
                None,
            )
            .await;
    }

    state.hub.unregister(&session.id).await;
    debug!(session_id = %session.id, "session closed");
}
