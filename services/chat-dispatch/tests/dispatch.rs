//! Dispatcher semantics: decode/lookup/deliver with drop-and-log on every
//! failure path, so a poisoned or unroutable record never blocks commit.

use chat_dispatch::dispatcher::{Dispatcher, Disposition};
use chat_dispatch::pool::{DeliveryPool, PoolConfig};
use chrono::{TimeZone, Utc};
use sc_protocol::ChatMessage;
use sc_registry::{MemoryRegistry, Registry};
use sc_test_utils::MockDeliveryServer;
use std::sync::Arc;
use std::time::Duration;

fn chat_record(room_id: &str, session_id: &str, content: &str) -> Vec<u8> {
    let message = ChatMessage {
        message_id: "m-1".to_owned(),
        user_id: "u-17".to_owned(),
        username: "ana".to_owned(),
        room_id: room_id.to_owned(),
        session_id: session_id.to_owned(),
        content: content.to_owned(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    };
    serde_json::to_vec(&message).expect("serialize chat record")
}

fn test_pool() -> Arc<DeliveryPool> {
    Arc::new(DeliveryPool::new(PoolConfig {
        dial_timeout: Duration::from_secs(2),
        call_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(60),
    }))
}

#[tokio::test]
async fn routable_record_is_delivered_to_the_owning_instance() {
    let server = MockDeliveryServer::start().await.expect("server");
    server
        .set_behavior(sc_test_utils::DeliveryBehavior::Ack { delivered_count: 2 })
        .await;

    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register("r-1", "s-1", &server.address(), Duration::from_secs(30))
        .await
        .expect("register");

    let pool = test_pool();
    let dispatcher = Dispatcher::new(registry, pool.clone());

    let disposition = dispatcher
        .handle_record(&chat_record("r-1", "s-1", "hello room"))
        .await;
    assert_eq!(disposition, Disposition::Delivered(2));

    let received = server.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].room_id, "r-1");
    assert_eq!(received[0].message.content, "hello room");
    assert_eq!(
        received[0].message.timestamp_unix_ms,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .unwrap()
            .timestamp_millis()
    );
    pool.close().await;
}

#[tokio::test]
async fn undecodable_record_is_skipped_without_touching_the_registry() {
    let registry = Arc::new(MemoryRegistry::new());
    let pool = test_pool();
    let dispatcher = Dispatcher::new(registry, pool.clone());

    let disposition = dispatcher.handle_record(b"{not chat json").await;
    assert_eq!(disposition, Disposition::BadRecord);
    assert_eq!(pool.len(), 0, "no delivery channel should have been opened");
    pool.close().await;
}

#[tokio::test]
async fn unregistered_session_drops_the_record_without_dialling() {
    let registry = Arc::new(MemoryRegistry::new());
    let pool = test_pool();
    let dispatcher = Dispatcher::new(registry, pool.clone());

    let disposition = dispatcher
        .handle_record(&chat_record("r-9", "s-9", "into the void"))
        .await;
    assert_eq!(disposition, Disposition::Unroutable);
    assert_eq!(pool.len(), 0);
    pool.close().await;
}

#[tokio::test]
async fn delivery_failure_is_dropped_not_propagated() {
    // Register an address nobody is listening on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let dead_address = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register("r-1", "s-1", &dead_address, Duration::from_secs(30))
        .await
        .expect("register");

    let pool = test_pool();
    let dispatcher = Dispatcher::new(registry, pool.clone());

    let disposition = dispatcher
        .handle_record(&chat_record("r-1", "s-1", "hello?"))
        .await;
    assert_eq!(disposition, Disposition::DeliveryFailed);
    pool.close().await;
}

#[tokio::test]
async fn per_session_records_arrive_in_submission_order() {
    let server = MockDeliveryServer::start().await.expect("server");
    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register("r-1", "s-1", &server.address(), Duration::from_secs(30))
        .await
        .expect("register");

    let pool = test_pool();
    let dispatcher = Dispatcher::new(registry, pool.clone());

    for n in 0..5 {
        let disposition = dispatcher
            .handle_record(&chat_record("r-1", "s-1", &format!("msg {n}")))
            .await;
        assert_eq!(disposition, Disposition::Delivered(1));
    }

    let contents: Vec<String> = server
        .received()
        .await
        .into_iter()
        .map(|r| r.message.content)
        .collect();
    assert_eq!(contents, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    pool.close().await;
}
