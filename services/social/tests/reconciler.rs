//! Reconciler passes: hot keys are reseeded from ground truth, drift from
//! duplicate change records is repaired, and the scoreboard resets.

use social::cache::{FollowCounts, MemoryCounts};
use social::cdc::handle_record;
use social::reconciler::Reconciler;
use social::repo::{FollowRepo, MemoryFollowRepo};
use std::sync::Arc;
use std::time::Duration;

fn soft_delete_record(following_id: i64) -> Vec<u8> {
    serde_json::json!({
        "payload": {
            "op": "u",
            "after": {"id": 1, "follower_id": 2, "following_id": following_id,
                      "deleted_at": 1_714_565_000_000_000i64},
            "ts_ms": 1_714_565_000_123i64
        }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn a_duplicated_soft_delete_is_repaired_by_the_next_pass() {
    let counts = Arc::new(MemoryCounts::new());
    let repo = Arc::new(MemoryFollowRepo::new());

    // Ground truth: user 9 had 3 followers, one of whom just unfollowed.
    for follower in [1, 2, 3] {
        repo.seed(follower, 9).await;
    }
    repo.unfollow(2, 9).await.expect("unfollow");

    // The first read warmed the cache at 3 and marked the key hot.
    counts
        .set_count(9, 3, Duration::from_secs(300))
        .await
        .expect("warm");
    counts.record_access(9).await.expect("access");

    // The unfollow's change record lands twice.
    handle_record(&soft_delete_record(9), counts.as_ref()).await;
    handle_record(&soft_delete_record(9), counts.as_ref()).await;
    assert_eq!(
        counts.get_count(9).await.expect("get"),
        Some(1),
        "duplicate overshoots before the pass"
    );

    let reconciler = Reconciler::new(
        counts.clone(),
        repo.clone(),
        Duration::from_secs(60),
        10,
        Duration::from_secs(300),
    );
    let summary = reconciler.refresh().await;
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.failures, 0);

    assert_eq!(
        counts.get_count(9).await.expect("get"),
        Some(2),
        "pass reseeds from ground truth"
    );
    assert!(
        counts.top_n(10).await.expect("top").is_empty(),
        "scoreboard resets each pass"
    );
}

#[tokio::test]
async fn only_hot_keys_are_reseeded() {
    let counts = Arc::new(MemoryCounts::new());
    let repo = Arc::new(MemoryFollowRepo::new());
    repo.seed(1, 9).await;
    repo.seed(1, 10).await;

    // Both warm, but only user 9 was read.
    counts
        .set_count(9, 42, Duration::from_secs(300))
        .await
        .expect("warm");
    counts
        .set_count(10, 42, Duration::from_secs(300))
        .await
        .expect("warm");
    counts.record_access(9).await.expect("access");

    Reconciler::new(
        counts.clone(),
        repo,
        Duration::from_secs(60),
        10,
        Duration::from_secs(300),
    )
    .refresh()
    .await;

    assert_eq!(counts.get_count(9).await.expect("get"), Some(1));
    assert_eq!(
        counts.get_count(10).await.expect("get"),
        Some(42),
        "cold-demand keys are left alone until they expire"
    );
}

#[tokio::test]
async fn top_n_bounds_how_many_keys_a_pass_touches() {
    let counts = Arc::new(MemoryCounts::new());
    let repo = Arc::new(MemoryFollowRepo::new());

    for user in 1..=5 {
        repo.seed(100, user).await;
        counts
            .set_count(user, 99, Duration::from_secs(300))
            .await
            .expect("warm");
        // user 1 hottest, user 5 coldest.
        for _ in 0..=(5 - user) {
            counts.record_access(user).await.expect("access");
        }
    }

    Reconciler::new(
        counts.clone(),
        repo,
        Duration::from_secs(60),
        2,
        Duration::from_secs(300),
    )
    .refresh()
    .await;

    assert_eq!(counts.get_count(1).await.expect("get"), Some(1));
    assert_eq!(counts.get_count(2).await.expect("get"), Some(1));
    for user in 3..=5 {
        assert_eq!(
            counts.get_count(user).await.expect("get"),
            Some(99),
            "user {user} is below the top-2 and must be untouched"
        );
    }
}

#[tokio::test]
async fn tick_loop_repairs_drift_and_stops_cooperatively() {
    let counts = Arc::new(MemoryCounts::new());
    let repo = Arc::new(MemoryFollowRepo::new());
    repo.seed(1, 9).await;
    repo.seed(2, 9).await;

    counts
        .set_count(9, 7, Duration::from_secs(300))
        .await
        .expect("warm with drifted value");
    counts.record_access(9).await.expect("access");

    let reconciler = Reconciler::new(
        counts.clone(),
        repo,
        Duration::from_millis(50),
        10,
        Duration::from_secs(300),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(reconciler.run(shutdown_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if counts.get_count(9).await.expect("get") == Some(2) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tick loop never repaired the drifted count"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _ = shutdown_tx.send(true);
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("reconciler must stop when signaled")
        .expect("reconciler task must not panic");
}
