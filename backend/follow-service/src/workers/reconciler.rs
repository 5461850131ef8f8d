//! Counter Reconciliation Background Job
//!
//! Periodically recomputes `followers_count` / `following_count` for every
//! user from the `follows` table and corrects drift. Drift normally only
//! comes from out-of-band writes or user deletes cascading away edges.

use std::time::Duration;

use tokio::time::sleep;

use crate::config::ReconcilerConfig;
use crate::services::FollowService;

/// Delay before the first pass so startup traffic settles
const INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Start the reconciliation loop. Returns immediately when disabled.
pub async fn start_reconciler(service: FollowService, config: ReconcilerConfig) {
    if !config.enabled {
        tracing::info!("Counter reconciliation job disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.interval_secs,
        batch_size = config.batch_size,
        "Starting counter reconciliation background job"
    );

    sleep(INITIAL_DELAY.min(config.interval())).await;

    let mut consecutive_failures = 0u32;
    loop {
        if run_once(&service, &config).await {
            consecutive_failures = 0;
        } else {
            consecutive_failures += 1;
            if consecutive_failures >= 3 {
                tracing::error!(
                    consecutive_failures,
                    "Counter reconciliation: CRITICAL - multiple consecutive failures"
                );
            }
        }

        sleep(config.interval()).await;
    }
}

/// One reconciliation pass; returns false if it failed.
pub async fn run_once(service: &FollowService, config: &ReconcilerConfig) -> bool {
    match service.reconcile_all(config.batch_size).await {
        Ok(report) => {
            tracing::info!(
                users_scanned = report.users_scanned,
                users_corrected = report.users_corrected,
                "Counter reconciliation cycle completed"
            );
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Counter reconciliation cycle failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{FollowStore, InMemoryFollowStore};
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_run_once_repairs_drift() {
        let store = Arc::new(InMemoryFollowStore::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.upsert_user(a, "a").await.unwrap();
        store.upsert_user(b, "b").await.unwrap();
        store.follow(a, b).await.unwrap();
        store.inject_drift(b, 7, 0).await.unwrap();

        let service = FollowService::new(store.clone());
        let config = ReconcilerConfig {
            batch_size: 1,
            ..ReconcilerConfig::default()
        };

        assert!(run_once(&service, &config).await);
        assert_eq!(store.counters(b).await.unwrap().followers_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_job_returns() {
        let service = FollowService::new(Arc::new(InMemoryFollowStore::new()));
        let config = ReconcilerConfig {
            enabled: false,
            ..ReconcilerConfig::default()
        };
        // Would loop forever if the flag were ignored.
        start_reconciler(service, config).await;
    }
}
