//! Delivery endpoint: the server side of the chat fan-out channel.
//!
//! Dispatchers hold one pooled WebSocket connection per instance and issue
//! `deliver_message` requests over it.  Each request fans the chat frame out
//! to the room's local clients; the reply carries how many buffers accepted
//! it.  An unknown room is a zero-count success, not an error — the session
//! may simply have moved on.

use crate::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use sc_protocol::{DeliverResult, DeliveryError, DeliveryFrame, ServerFrame};
use tracing::{debug, warn};

pub async fn ws_delivery_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_delivery_socket(socket, state))
}

async fn handle_delivery_socket(mut socket: WebSocket, state: AppState) {
    debug!("delivery channel opened");
    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "delivery channel read failed");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = match serde_json::from_str::<DeliveryFrame>(&text) {
            Ok(DeliveryFrame::DeliverMessage(request)) => {
                let delivered_count = state
                    .hub
                    .broadcast_to_room(
                        &request.room_id,
                        &ServerFrame::ChatMessage(request.message),
                        None,
                    )
                    .await;
                debug!(
                    room_id = %request.room_id,
                    session_id = %request.session_id,
                    delivered_count,
                    "chat message fanned out"
                );
                DeliveryFrame::DeliverResult(DeliverResult { delivered_count })
            }
            Ok(_) => DeliveryFrame::Error(DeliveryError {
                code: "BAD_REQUEST".to_owned(),
                message: "expected deliver_message".to_owned(),
            }),
            Err(e) => {
                warn!(error = %e, "undecodable delivery frame");
                DeliveryFrame::Error(DeliveryError {
                    code: "BAD_REQUEST".to_owned(),
                    message: format!("malformed frame: {e}"),
                })
            }
        };

        let Ok(json) = serde_json::to_string(&reply) else {
            continue;
        };
        if socket.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    debug!("delivery channel closed");
}
