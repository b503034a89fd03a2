// sc-protocol: wire types for the live-streaming real-time cores.
//
// Three independent surfaces live here, each with its own discriminated
// union:
//   - the signaling WebSocket (client <-> signaling), tagged by `type`
//   - the delivery channel (dispatcher <-> signaling), tagged by `kind`
//   - the broker topics (chat envelope, broadcast lifecycle events, CDC)
//
// All WebSocket traffic is JSON text frames.  Shapes are pinned by the
// contract tests in `tests/contract_examples.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Signaling: client -> server frames
// ---------------------------------------------------------------------------

/// Frames a client may send on the signaling socket.
///
/// The `type` field is the discriminant:
///
/// ```json
/// { "type": "join_room", "room_id": "r-42" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection; carries the bearer token.
    Auth { token: String },
    JoinRoom {
        room_id: String,
    },
    /// Owner-only.  `offer` is the SDP offer forwarded to the media ingest.
    StartBroadcast {
        room_id: String,
        offer: String,
    },
    /// Trickle ICE; the candidate payload is opaque to the signaling layer.
    IceCandidate {
        room_id: String,
        candidate: serde_json::Value,
    },
    StopBroadcast {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    Ping,
}

// ---------------------------------------------------------------------------
// Signaling: server -> client frames
// ---------------------------------------------------------------------------

/// Frames the signaling server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Populated on failure with a human-readable reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    RoomJoined {
        room_id: String,
        is_owner: bool,
        viewer_count: u64,
        is_live: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hls_url: Option<String>,
    },
    /// The ingest's SDP answer, relayed back to the broadcaster.
    BroadcastStarted {
        room_id: String,
        answer: String,
    },
    /// Pushed when a room's HLS playlist becomes available mid-session.
    StreamAvailable {
        room_id: String,
        hls_url: String,
    },
    ViewerCount {
        room_id: String,
        count: u64,
    },
    /// A chat message fanned out to the room (final hop of the chat pipeline).
    ChatMessage(ChatPayload),
    Error {
        code: String,
        message: String,
    },
    Pong,
}

/// Frozen signaling error codes.
pub mod error_codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const ROOM_NOT_LIVE: &str = "ROOM_NOT_LIVE";
    pub const ALREADY_STREAMING: &str = "ALREADY_STREAMING";
}

// ---------------------------------------------------------------------------
// Chat topic envelope (producer -> dispatcher)
// ---------------------------------------------------------------------------

/// One chat message as published on the chat topic.
///
/// The producer keys records by `session_id`, so per-session ordering is a
/// broker partition guarantee, not something the dispatcher enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub user_id: String,
    pub username: String,
    pub room_id: String,
    pub session_id: String,
    pub content: String,
    /// RFC3339 producer timestamp.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Delivery channel (dispatcher <-> signaling instance)
// ---------------------------------------------------------------------------

/// The chat message body as carried on the delivery channel and pushed to
/// clients.  Timestamps are epoch milliseconds here; the RFC3339 form only
/// exists on the broker topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message_id: String,
    pub user_id: String,
    pub username: String,
    pub room_id: String,
    pub session_id: String,
    pub timestamp_unix_ms: i64,
    pub content: String,
}

impl ChatMessage {
    /// Convert the topic envelope into the delivery-channel body.
    pub fn into_payload(self) -> ChatPayload {
        ChatPayload {
            timestamp_unix_ms: self.timestamp.timestamp_millis(),
            message_id: self.message_id,
            user_id: self.user_id,
            username: self.username,
            room_id: self.room_id,
            session_id: self.session_id,
            content: self.content,
        }
    }
}

/// Request: deliver one chat message to the room's local clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverMessage {
    pub room_id: String,
    pub session_id: String,
    pub message: ChatPayload,
}

/// Response to a [`DeliverMessage`].
///
/// `delivered_count` is the number of local clients whose outbound buffer
/// accepted the frame.  An unknown room is not an error: the response is
/// `delivered_count = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverResult {
    pub delivered_count: u32,
}

/// Typed error on the delivery channel (malformed request, internal fault).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryError {
    pub code: String,
    pub message: String,
}

/// All frames on the delivery channel, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryFrame {
    DeliverMessage(DeliverMessage),
    DeliverResult(DeliverResult),
    Error(DeliveryError),
}

// ---------------------------------------------------------------------------
// Broadcast lifecycle events (signaling -> event topic)
// ---------------------------------------------------------------------------

/// Why a broadcast stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Explicit,
    Disconnect,
    Timeout,
}

/// Lifecycle event for a room's broadcast, produced with the room id as the
/// partition key so that per-room emission order survives the topic.
///
/// `timestamp` is epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    BroadcastStarted {
        room_id: String,
        broadcaster_id: String,
        timestamp: i64,
    },
    BroadcastStopped {
        room_id: String,
        broadcaster_id: String,
        reason: StopReason,
        timestamp: i64,
    },
}

impl BroadcastEvent {
    /// The partition key: all events for a room share it.
    pub fn room_id(&self) -> &str {
        match self {
            BroadcastEvent::BroadcastStarted { room_id, .. }
            | BroadcastEvent::BroadcastStopped { room_id, .. } => room_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            BroadcastEvent::BroadcastStarted { timestamp, .. }
            | BroadcastEvent::BroadcastStopped { timestamp, .. } => *timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Follow-table CDC envelope
// ---------------------------------------------------------------------------

/// One row of the follows table as it appears in change records.
///
/// `created_at` / `deleted_at` are epoch microseconds as emitted by the
/// capture connector; a null `deleted_at` marks the row active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowRow {
    pub id: i64,
    pub follower_id: i64,
    pub following_id: i64,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

/// `payload` body of a change record.
///
/// `op` is one of `r` (snapshot), `c` (create), `u` (update), `d` (delete).
/// Hard deletes carry the full `before` image; the table must be configured
/// accordingly or `d` records cannot be attributed to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub op: String,
    #[serde(default)]
    pub before: Option<FollowRow>,
    #[serde(default)]
    pub after: Option<FollowRow>,
    #[serde(default)]
    pub ts_ms: Option<i64>,
}

/// Top-level change record envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub payload: ChangePayload,
}

// ---------------------------------------------------------------------------
// HTTP API types (social service)
// ---------------------------------------------------------------------------

/// Error body inside an [`ApiResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Envelope for mutating follow operations: `{success, data | error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// `GET /api/v1/users/{id}/followers/count` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerCount {
    pub count: i64,
}

/// `POST /api/v1/users/{id}/following/status` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowingStatusRequest {
    pub target_ids: Vec<i64>,
}

/// `POST /api/v1/users/{id}/following/status` response: target id -> bool.
/// Keys are decimal id strings (JSON object keys).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowingStatusResponse {
    pub results: HashMap<String, bool>,
}
