//! Periodic hot-key reconciliation.
//!
//! Every interval: snapshot the top-N hot keys, re-read each user's count
//! from the authoritative store, overwrite the cache unconditionally, then
//! reset the scoreboard.  This repairs drift from duplicated or lost change
//! records and keeps the warm set focused on what is actually being read.

use crate::cache::FollowCounts;
use crate::repo::FollowRepo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failures: usize,
}

pub struct Reconciler {
    counts: Arc<dyn FollowCounts>,
    repo: Arc<dyn FollowRepo>,
    interval: Duration,
    top_n: usize,
    cache_ttl: Duration,
}

impl Reconciler {
    pub fn new(
        counts: Arc<dyn FollowCounts>,
        repo: Arc<dyn FollowRepo>,
        interval: Duration,
        top_n: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            counts,
            repo,
            interval,
            top_n,
            cache_ttl,
        }
    }

    /// One reconciliation pass.  Per-user failures are logged and skipped;
    /// the scoreboard resets regardless so stale demand does not pile up.
    pub async fn refresh(&self) -> RefreshSummary {
        let hot = match self.counts.top_n(self.top_n).await {
            Ok(hot) => hot,
            Err(e) => {
                warn!(error = %e, "hot-key snapshot failed, skipping pass");
                return RefreshSummary {
                    refreshed: 0,
                    failures: 1,
                };
            }
        };

        let mut summary = RefreshSummary {
            refreshed: 0,
            failures: 0,
        };
        for user_id in hot {
            let count = match self.repo.follower_count(user_id).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(user_id, error = %e, "ground-truth read failed");
                    summary.failures += 1;
                    continue;
                }
            };
            match self.counts.set_count(user_id, count, self.cache_ttl).await {
                Ok(()) => summary.refreshed += 1,
                Err(e) => {
                    warn!(user_id, error = %e, "cache reseed failed");
                    summary.failures += 1;
                }
            }
        }

        if let Err(e) = self.counts.reset_hot_keys().await {
            warn!(error = %e, "scoreboard reset failed");
            summary.failures += 1;
        }
        debug!(
            refreshed = summary.refreshed,
            failures = summary.failures,
            "reconciliation pass complete"
        );
        summary
    }

    /// Tick until told to stop; the caller awaits the task handle to know
    /// the loop has fully drained.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the immediate first tick; reads should warm the scoreboard
        // before the first pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let _ = self.refresh().await;
                }
            }
        }
        info!("reconciler exited");
    }
}
