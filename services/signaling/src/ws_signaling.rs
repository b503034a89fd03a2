//! Signaling socket lifecycle: accept, pump, tear down.
//!
//! Each connection runs two tasks.  The read pump enforces the inactivity
//! deadline and feeds frames to the state machine; the write pump drains the
//! client's outbound channel and pings on an interval.  The outbound channel
//! closing (hub unregistration drops the last sender) is the write pump's
//! only exit signal besides a failed write.

use crate::session::Session;
use crate::signal;
use crate::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sc_protocol::{ClientFrame, ServerFrame, error_codes};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub async fn ws_signaling_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let ws = ws.max_message_size(state.options.ws.max_message_size);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = Arc::new(Session::new());
    debug!(session_id = %session.id, "signaling connection accepted");

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(state.options.ws.outbound_buffer);
    let (ws_tx, ws_rx) = socket.split();

    state.track_session(session.clone()).await;
    state
        .hub
        .register(crate::hub::ClientHandle::new(
            session.id.clone(),
            outbound_tx,
        ))
        .await;

    let write_task = tokio::spawn(write_pump(
        ws_tx,
        outbound_rx,
        state.options.ws.ping_interval,
        state.options.ws.write_wait,
    ));

    read_pump(ws_rx, &state, &session).await;

    // Disconnect handler runs before unregistration completes the teardown;
    // unregister drops the last outbound sender, which stops the write pump.
    signal::handle_disconnect(&state, &session).await;
    state.untrack_session(&session.id).await;
    let _ = write_task.await;
    debug!(session_id = %session.id, "signaling connection closed");
}

async fn read_pump(mut ws_rx: SplitStream<WebSocket>, state: &AppState, session: &Arc<Session>) {
    loop {
        let message = match tokio::time::timeout(state.options.ws.pong_wait, ws_rx.next()).await {
            Err(_elapsed) => {
                debug!(session_id = %session.id, "read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(session_id = %session.id, error = %e, "read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => signal::handle_frame(state, session, frame).await,
                Err(e) => {
                    debug!(session_id = %session.id, error = %e, "undecodable frame");
                    let _ = state
                        .hub
                        .send_to_client(
                            &session.id,
                            &ServerFrame::Error {
                                code: error_codes::BAD_REQUEST.to_owned(),
                                message: "malformed frame".to_owned(),
                            },
                        )
                        .await;
                }
            },
            // Pongs (and any other traffic) reset the deadline by reaching
            // the next loop iteration; the protocol layer answers pings.
            Message::Pong(_) | Message::Ping(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                debug!(session_id = %session.id, "ignoring binary frame");
            }
        }
    }
}

async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
    ping_interval: Duration,
    write_wait: Duration,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so pings are spaced.
    ticker.tick().await;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    None => {
                        // Channel closed: the hub let go of this client.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    Some(json) => {
                        let write = ws_tx.send(Message::Text(json.into()));
                        match tokio::time::timeout(write_wait, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) | Err(_) => break,
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                let write = ws_tx.send(Message::Ping(Vec::new().into()));
                match tokio::time::timeout(write_wait, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => break,
                }
            }
        }
    }
}
