//! Contract tests pinning the JSON shapes that cross service boundaries.
//!
//! These literals are the frozen wire forms; a failure here means a breaking
//! change for at least one producer or consumer on the other side of a topic
//! or socket.

use sc_protocol::*;

fn value(json: &str) -> serde_json::Value {
    serde_json::from_str(json).expect("example literal should be valid JSON")
}

#[test]
fn chat_topic_envelope_matches_the_published_shape() {
    let json = r#"{
        "message_id": "01HZX3T9G7",
        "user_id": "u-17",
        "username": "ana",
        "room_id": "r-42",
        "session_id": "s-9001",
        "content": "hello room",
        "timestamp": "2024-05-01T12:00:00Z"
    }"#;
    let msg: ChatMessage = serde_json::from_str(json).expect("chat envelope parses");
    assert_eq!(msg.room_id, "r-42");
    assert_eq!(msg.session_id, "s-9001");

    let reserialized = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(reserialized, value(json));
}

#[test]
fn broadcast_started_event_value_matches_the_topic_shape() {
    let event = BroadcastEvent::BroadcastStarted {
        room_id: "r-42".to_owned(),
        broadcaster_id: "u-17".to_owned(),
        timestamp: 1_714_564_800,
    };
    assert_eq!(
        serde_json::to_value(&event).expect("serialize"),
        value(
            r#"{
                "type": "broadcast_started",
                "room_id": "r-42",
                "broadcaster_id": "u-17",
                "timestamp": 1714564800
            }"#
        )
    );
}

#[test]
fn broadcast_stopped_event_carries_a_reason() {
    let json = r#"{
        "type": "broadcast_stopped",
        "room_id": "r-42",
        "broadcaster_id": "u-17",
        "reason": "timeout",
        "timestamp": 1714564999
    }"#;
    let event: BroadcastEvent = serde_json::from_str(json).expect("stopped event parses");
    match &event {
        BroadcastEvent::BroadcastStopped { reason, .. } => {
            assert_eq!(*reason, StopReason::Timeout);
        }
        other => panic!("expected broadcast_stopped, got {other:?}"),
    }
    assert_eq!(serde_json::to_value(&event).expect("serialize"), value(json));
}

#[test]
fn delivery_request_and_result_frames_round_trip() {
    let request_json = r#"{
        "kind": "deliver_message",
        "room_id": "r-42",
        "session_id": "s-9001",
        "message": {
            "message_id": "01HZX3T9G7",
            "user_id": "u-17",
            "username": "ana",
            "room_id": "r-42",
            "session_id": "s-9001",
            "timestamp_unix_ms": 1714564800000,
            "content": "hello room"
        }
    }"#;
    let frame: DeliveryFrame = serde_json::from_str(request_json).expect("request parses");
    match &frame {
        DeliveryFrame::DeliverMessage(req) => {
            assert_eq!(req.message.timestamp_unix_ms, 1_714_564_800_000);
        }
        other => panic!("expected deliver_message, got {other:?}"),
    }
    assert_eq!(
        serde_json::to_value(&frame).expect("serialize"),
        value(request_json)
    );

    let result_json = r#"{"kind":"deliver_result","delivered_count":2}"#;
    let frame: DeliveryFrame = serde_json::from_str(result_json).expect("result parses");
    assert_eq!(
        frame,
        DeliveryFrame::DeliverResult(DeliverResult { delivered_count: 2 })
    );
}

#[test]
fn cdc_update_record_distinguishes_soft_delete_from_restore() {
    let soft_delete = r#"{
        "payload": {
            "op": "u",
            "before": {"id": 7, "follower_id": 100, "following_id": 200, "created_at": 1714564800000000, "deleted_at": null},
            "after":  {"id": 7, "follower_id": 100, "following_id": 200, "created_at": 1714564800000000, "deleted_at": 1714565000000000},
            "ts_ms": 1714565000123
        }
    }"#;
    let env: ChangeEnvelope = serde_json::from_str(soft_delete).expect("update record parses");
    assert_eq!(env.payload.op, "u");
    let after = env.payload.after.expect("after image present");
    assert!(after.deleted_at.is_some(), "soft delete sets deleted_at");
    assert_eq!(after.following_id, 200);

    let restore = r#"{
        "payload": {
            "op": "u",
            "after": {"id": 7, "follower_id": 100, "following_id": 200, "deleted_at": null},
            "ts_ms": 1714565100123
        }
    }"#;
    let env: ChangeEnvelope = serde_json::from_str(restore).expect("restore record parses");
    let after = env.payload.after.expect("after image present");
    assert!(after.deleted_at.is_none(), "restore clears deleted_at");
}

#[test]
fn signaling_room_joined_frame_matches_the_documented_shape() {
    let frame = ServerFrame::RoomJoined {
        room_id: "r-42".to_owned(),
        is_owner: false,
        viewer_count: 3,
        is_live: true,
        hls_url: Some("https://cdn.example.com/r-42/index.m3u8".to_owned()),
    };
    assert_eq!(
        serde_json::to_value(&frame).expect("serialize"),
        value(
            r#"{
                "type": "room_joined",
                "room_id": "r-42",
                "is_owner": false,
                "viewer_count": 3,
                "is_live": true,
                "hls_url": "https://cdn.example.com/r-42/index.m3u8"
            }"#
        )
    );
}
