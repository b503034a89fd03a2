//! Idle-broadcast watchdog.
//!
//! A broadcaster that stops sending signaling traffic (crashed tab, dead
//! uplink) never sends `stop_broadcast`, and its socket may linger.  This
//! task scans the live-room table on an interval and force-stops any
//! broadcast whose last inbound frame is older than
//! `heartbeat_timeout + grace_period`, emitting `broadcast_stopped` with the
//! timeout reason.  The session, if still connected, drops back to its
//! in-room state.

use crate::state::AppState;
use chrono::Utc;
use sc_protocol::{BroadcastEvent, StopReason};
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run_idle_watchdog(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let tuning = &state.options.broadcast;
    let cutoff = tuning.heartbeat_timeout + tuning.grace_period;
    let mut ticker = tokio::time::interval(tuning.watchdog_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                for stale in state.live.idle_broadcasts(cutoff).await {
                    // Re-check under the table lock; the broadcaster may have
                    // spoken up or stopped explicitly since the scan.
                    let Some(ended) = state
                        .live
                        .stop_if_session(&stale.room_id, &stale.session_id)
                        .await
                    else {
                        continue;
                    };

                    info!(
                        room_id = %ended.room_id,
                        broadcaster_id = %ended.broadcaster_id,
                        idle = ?ended.last_activity.elapsed(),
                        "broadcast idle past cutoff, stopping"
                    );

                    if let Err(e) = state.ingest.stop_session(&ended.room_id).await {
                        warn!(room_id = %ended.room_id, error = %e, "ingest session release failed");
                    }
                    if let Some(session) = state.session(&ended.session_id).await {
                        session.set_broadcaster(false);
                    }
                    state
                        .events
                        .publish(BroadcastEvent::BroadcastStopped {
                            room_id: ended.room_id.clone(),
                            broadcaster_id: ended.broadcaster_id.clone(),
                            reason: StopReason::Timeout,
                            timestamp: Utc::now().timestamp(),
                        })
                        .await;
                }
            }
        }
    }
    info!("idle watchdog exited");
}
