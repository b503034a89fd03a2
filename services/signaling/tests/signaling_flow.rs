//! End-to-end signaling flows over real WebSockets: authentication, room
//! membership, broadcast lifecycle, and the events they emit.

mod common;

use common::spawn_instance;
use sc_protocol::{BroadcastEvent, ClientFrame, ServerFrame, StopReason, error_codes};
use sc_test_utils::MockWsClient;
use signaling::state::InstanceOptions;
use std::time::Duration;

const RECV_WAIT: Duration = Duration::from_secs(2);

async fn connect(url: &str) -> MockWsClient {
    MockWsClient::connect(url).await.expect("connect")
}

async fn authenticate(client: &mut MockWsClient, token: &str) {
    client
        .send_frame(&ClientFrame::Auth {
            token: token.to_owned(),
        })
        .await
        .expect("send auth");
    match client
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("auth_result")
    {
        ServerFrame::AuthResult { success: true, .. } => {}
        other => panic!("expected successful auth_result, got {other:?}"),
    }
}

async fn join(client: &mut MockWsClient, room_id: &str) -> ServerFrame {
    client
        .send_frame(&ClientFrame::JoinRoom {
            room_id: room_id.to_owned(),
        })
        .await
        .expect("send join_room");
    client
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("room_joined")
}

async fn wait_for_events(
    instance: &common::TestInstance,
    room_id: &str,
    expected: usize,
) -> Vec<BroadcastEvent> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let events = instance.events.events_for_room(room_id).await;
        if events.len() >= expected {
            return events;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} events for {room_id}, have {events:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn frames_before_auth_are_rejected_with_unauthorized() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut client = connect(&instance.signaling_url()).await;

    client
        .send_frame(&ClientFrame::JoinRoom {
            room_id: "r-1".to_owned(),
        })
        .await
        .expect("send join");

    match client
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("error frame")
    {
        ServerFrame::Error { code, .. } => assert_eq!(code, error_codes::UNAUTHORIZED),
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_token_yields_a_failed_auth_result_and_the_session_stays_usable() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut client = connect(&instance.signaling_url()).await;

    client
        .send_frame(&ClientFrame::Auth {
            token: "tok-wrong".to_owned(),
        })
        .await
        .expect("send auth");
    match client
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("auth_result")
    {
        ServerFrame::AuthResult {
            success: false,
            message,
            ..
        } => assert!(message.is_some()),
        other => panic!("expected failed auth_result, got {other:?}"),
    }

    // The connection is still NEW, not closed: a good token succeeds.
    authenticate(&mut client, "tok-viewer").await;
}

#[tokio::test]
async fn ping_is_answered_with_pong_even_before_auth() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut client = connect(&instance.signaling_url()).await;

    client.send_frame(&ClientFrame::Ping).await.expect("ping");
    let frame = client
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("pong");
    assert_eq!(frame, ServerFrame::Pong);
}

#[tokio::test]
async fn join_registers_the_session_and_reports_room_state() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut viewer = connect(&instance.signaling_url()).await;
    authenticate(&mut viewer, "tok-viewer").await;

    match join(&mut viewer, "r-1").await {
        ServerFrame::RoomJoined {
            room_id,
            is_owner,
            viewer_count,
            is_live,
            hls_url,
        } => {
            assert_eq!(room_id, "r-1");
            assert!(!is_owner);
            assert_eq!(viewer_count, 1);
            assert!(!is_live);
            assert!(hls_url.is_none());
        }
        other => panic!("expected room_joined, got {other:?}"),
    }

    let claims = instance.registry.claims().await;
    assert_eq!(claims.len(), 1, "join must claim the session");
    assert_eq!(claims[0].0, "r-1");
    assert_eq!(claims[0].2, instance.state.options.advertised_address);

    // Leaving releases the claim.
    viewer
        .send_frame(&ClientFrame::LeaveRoom {
            room_id: "r-1".to_owned(),
        })
        .await
        .expect("send leave");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !instance.registry.claims().await.is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "leave must release the registry claim"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn joining_an_unknown_room_is_not_found() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut client = connect(&instance.signaling_url()).await;
    authenticate(&mut client, "tok-viewer").await;

    match join(&mut client, "r-ghost").await {
        ServerFrame::Error { code, .. } => assert_eq!(code, error_codes::NOT_FOUND),
        other => panic!("expected NOT_FOUND, got {other:?}"),
    }
}

#[tokio::test]
async fn non_owner_cannot_start_a_broadcast() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut viewer = connect(&instance.signaling_url()).await;
    authenticate(&mut viewer, "tok-viewer").await;
    join(&mut viewer, "r-1").await;

    viewer
        .send_frame(&ClientFrame::StartBroadcast {
            room_id: "r-1".to_owned(),
            offer: "v=0 viewer-offer".to_owned(),
        })
        .await
        .expect("send start");
    match viewer
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("error")
    {
        ServerFrame::Error { code, .. } => assert_eq!(code, error_codes::FORBIDDEN),
        other => panic!("expected FORBIDDEN, got {other:?}"),
    }
    assert!(instance.events.events_for_room("r-1").await.is_empty());
}

#[tokio::test]
async fn owner_broadcast_lifecycle_emits_ordered_room_events() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut owner = connect(&instance.signaling_url()).await;
    authenticate(&mut owner, "tok-owner").await;
    match join(&mut owner, "r-1").await {
        ServerFrame::RoomJoined { is_owner, .. } => assert!(is_owner),
        other => panic!("expected room_joined, got {other:?}"),
    }

    owner
        .send_frame(&ClientFrame::StartBroadcast {
            room_id: "r-1".to_owned(),
            offer: "v=0 owner-offer".to_owned(),
        })
        .await
        .expect("send start");
    match owner
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("broadcast_started")
    {
        ServerFrame::BroadcastStarted { room_id, answer } => {
            assert_eq!(room_id, "r-1");
            assert_eq!(answer, "v=0 answer-for-r-1");
        }
        other => panic!("expected broadcast_started, got {other:?}"),
    }

    // A viewer joining now sees the room live.
    let mut viewer = connect(&instance.signaling_url()).await;
    authenticate(&mut viewer, "tok-viewer").await;
    match join(&mut viewer, "r-1").await {
        ServerFrame::RoomJoined {
            is_live,
            viewer_count,
            ..
        } => {
            assert!(is_live);
            assert_eq!(viewer_count, 2);
        }
        other => panic!("expected room_joined, got {other:?}"),
    }

    // The owner sees the occupancy change.
    match owner
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("viewer_count")
    {
        ServerFrame::ViewerCount { count, .. } => assert_eq!(count, 2),
        other => panic!("expected viewer_count, got {other:?}"),
    }

    // Disconnecting the owner stops the broadcast with the disconnect reason.
    owner.close().await.expect("close owner");
    let events = wait_for_events(&instance, "r-1", 2).await;
    match &events[0] {
        BroadcastEvent::BroadcastStarted {
            broadcaster_id, ..
        } => assert_eq!(broadcaster_id, "u-owner"),
        other => panic!("expected broadcast_started first, got {other:?}"),
    }
    match &events[1] {
        BroadcastEvent::BroadcastStopped {
            broadcaster_id,
            reason,
            ..
        } => {
            assert_eq!(broadcaster_id, "u-owner");
            assert_eq!(*reason, StopReason::Disconnect);
        }
        other => panic!("expected broadcast_stopped second, got {other:?}"),
    }
    assert!(
        events[0].timestamp() <= events[1].timestamp(),
        "room events must be monotonic in timestamp"
    );

    assert_eq!(
        instance.ingest.stopped_rooms().await,
        vec!["r-1".to_owned()],
        "ingest session must be released on disconnect"
    );
}

#[tokio::test]
async fn a_room_rejects_a_second_broadcaster_with_already_streaming() {
    let instance = spawn_instance(InstanceOptions::default()).await;

    let mut first = connect(&instance.signaling_url()).await;
    authenticate(&mut first, "tok-owner").await;
    join(&mut first, "r-1").await;
    first
        .send_frame(&ClientFrame::StartBroadcast {
            room_id: "r-1".to_owned(),
            offer: "v=0 one".to_owned(),
        })
        .await
        .expect("send start");
    first
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("broadcast_started");

    // The same owner on a second session cannot double-start the room.
    let mut second = connect(&instance.signaling_url()).await;
    authenticate(&mut second, "tok-owner").await;
    join(&mut second, "r-1").await;
    second
        .send_frame(&ClientFrame::StartBroadcast {
            room_id: "r-1".to_owned(),
            offer: "v=0 two".to_owned(),
        })
        .await
        .expect("send start");
    match second
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("error")
    {
        ServerFrame::Error { code, .. } => assert_eq!(code, error_codes::ALREADY_STREAMING),
        other => panic!("expected ALREADY_STREAMING, got {other:?}"),
    }
}

#[tokio::test]
async fn explicit_stop_returns_the_owner_to_the_room_and_allows_a_restart() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut owner = connect(&instance.signaling_url()).await;
    authenticate(&mut owner, "tok-owner").await;
    join(&mut owner, "r-1").await;

    for round in 0..2 {
        owner
            .send_frame(&ClientFrame::StartBroadcast {
                room_id: "r-1".to_owned(),
                offer: format!("v=0 round-{round}"),
            })
            .await
            .expect("send start");
        match owner
            .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
            .await
            .expect("broadcast_started")
        {
            ServerFrame::BroadcastStarted { .. } => {}
            other => panic!("expected broadcast_started, got {other:?}"),
        }

        owner
            .send_frame(&ClientFrame::StopBroadcast {
                room_id: "r-1".to_owned(),
            })
            .await
            .expect("send stop");
        let events = wait_for_events(&instance, "r-1", (round + 1) * 2).await;
        match events.last().expect("last event") {
            BroadcastEvent::BroadcastStopped { reason, .. } => {
                assert_eq!(*reason, StopReason::Explicit);
            }
            other => panic!("expected broadcast_stopped, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn stop_broadcast_on_an_idle_room_is_room_not_live() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut owner = connect(&instance.signaling_url()).await;
    authenticate(&mut owner, "tok-owner").await;
    join(&mut owner, "r-1").await;

    owner
        .send_frame(&ClientFrame::StopBroadcast {
            room_id: "r-1".to_owned(),
        })
        .await
        .expect("send stop");
    match owner
        .recv_frame_timeout::<ServerFrame>(RECV_WAIT)
        .await
        .expect("error")
    {
        ServerFrame::Error { code, .. } => assert_eq!(code, error_codes::ROOM_NOT_LIVE),
        other => panic!("expected ROOM_NOT_LIVE, got {other:?}"),
    }
}

#[tokio::test]
async fn ice_candidates_are_forwarded_to_the_ingest() {
    let instance = spawn_instance(InstanceOptions::default()).await;
    let mut owner = connect(&instance.signaling_url()).await;
    authenticate(&mut owner, "tok-owner").await;
    join(&mut owner, "r-1").await;

    let candidate = serde_json::json!({"candidate": "candidate:1 1 udp 2122, ...", "sdpMid": "0"});
    owner
        .send_frame(&ClientFrame::IceCandidate {
            room_id: "r-1".to_owned(),
            candidate: candidate.clone(),
        })
        .await
        .expect("send candidate");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let forwarded = instance.ingest.candidates().await;
        if !forwarded.is_empty() {
            assert_eq!(forwarded[0].0, "r-1");
            assert_eq!(forwarded[0].1, candidate);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "candidate was never forwarded"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
