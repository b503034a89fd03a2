//! Idle-broadcast enforcement: a silent broadcaster is stopped with the
//! timeout reason; an active one is left alone.

mod common;

use common::spawn_instance;
use sc_protocol::{BroadcastEvent, ClientFrame, ServerFrame, StopReason};
use sc_test_utils::MockWsClient;
use signaling::state::{BroadcastTuning, InstanceOptions};
use signaling::watchdog;
use std::time::Duration;

const RECV_WAIT: Duration = Duration::from_secs(2);

fn fast_tuning() -> InstanceOptions {
    InstanceOptions {
        broadcast: BroadcastTuning {
            heartbeat_timeout: Duration::from_millis(200),
            grace_period: Duration::from_millis(100),
            watchdog_interval: Duration::from_millis(50),
        },
        ..InstanceOptions::default()
    }
}

async fn start_broadcasting(instance: &common::TestInstance) -> MockWsClient {
    let mut owner = MockWsClient::connect(&instance.signaling_url())
        .await
        .expect("connect");
    owner
        .send_frame(&ClientFrame::Auth {
            token: "tok-owner".to_owned(),
        })
        .await
        .expect("send auth");
    owner
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("auth_result");
    owner
        .send_frame(&ClientFrame::JoinRoom {
            room_id: "r-1".to_owned(),
        })
        .await
        .expect("send join");
    owner
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("room_joined");
    owner
        .send_frame(&ClientFrame::StartBroadcast {
            room_id: "r-1".to_owned(),
            offer: "v=0 offer".to_owned(),
        })
        .await
        .expect("send start");
    owner
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("broadcast_started");
    owner
}

#[tokio::test]
async fn a_silent_broadcaster_is_stopped_with_the_timeout_reason() {
    let instance = spawn_instance(fast_tuning()).await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watchdog_handle = tokio::spawn(watchdog::run_idle_watchdog(
        instance.state.clone(),
        shutdown_rx,
    ));

    let _owner = start_broadcasting(&instance).await;
    assert!(instance.state.live.is_live("r-1").await);

    // Stay silent past heartbeat + grace and let the watchdog fire.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let events = instance.events.events_for_room("r-1").await;
        if events.len() >= 2 {
            match &events[1] {
                BroadcastEvent::BroadcastStopped { reason, .. } => {
                    assert_eq!(*reason, StopReason::Timeout);
                }
                other => panic!("expected broadcast_stopped, got {other:?}"),
            }
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watchdog never stopped the idle broadcast; events: {events:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(!instance.state.live.is_live("r-1").await);
    assert_eq!(instance.ingest.stopped_rooms().await, vec!["r-1".to_owned()]);

    let _ = shutdown_tx.send(true);
    let _ = watchdog_handle.await;
}

#[tokio::test]
async fn inbound_traffic_keeps_the_broadcast_alive() {
    let instance = spawn_instance(fast_tuning()).await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watchdog_handle = tokio::spawn(watchdog::run_idle_watchdog(
        instance.state.clone(),
        shutdown_rx,
    ));

    let mut owner = start_broadcasting(&instance).await;

    // Ping well inside the cutoff for ~1s of wall time.
    for _ in 0..10 {
        owner.send_frame(&ClientFrame::Ping).await.expect("ping");
        owner
            .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
            .await
            .expect("pong");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(
        instance.state.live.is_live("r-1").await,
        "an active broadcaster must not be timed out"
    );
    assert_eq!(
        instance.events.events_for_room("r-1").await.len(),
        1,
        "only the started event should exist"
    );

    let _ = shutdown_tx.send(true);
    let _ = watchdog_handle.await;
}

#[tokio::test]
async fn after_a_timeout_stop_the_owner_can_start_again() {
    let instance = spawn_instance(fast_tuning()).await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watchdog_handle = tokio::spawn(watchdog::run_idle_watchdog(
        instance.state.clone(),
        shutdown_rx,
    ));

    let mut owner = start_broadcasting(&instance).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while instance.state.live.is_live("r-1").await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "watchdog never fired"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The session dropped back to its in-room state; a restart is legal.
    owner
        .send_frame(&ClientFrame::StartBroadcast {
            room_id: "r-1".to_owned(),
            offer: "v=0 again".to_owned(),
        })
        .await
        .expect("send restart");
    match owner
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("frame")
    {
        ServerFrame::BroadcastStarted { .. } => {}
        other => panic!("expected broadcast_started after timeout stop, got {other:?}"),
    }

    let _ = shutdown_tx.send(true);
    let _ = watchdog_handle.await;
}
