use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    CounterCorrection, FollowChange, FollowPage, FollowSuggestion, PageRequest, ReconcileReport,
    UserCounters, UserProfile,
};
use crate::error::{codes, FollowError, FollowResult};
use crate::metrics;
use crate::repository::FollowStore;

/// Follow graph operations with counter maintenance and drift reconciliation.
///
/// All mutations go through the store's atomic follow/unfollow; this layer
/// validates input, records outcomes and drives reconciliation.
#[derive(Clone)]
pub struct FollowService {
    store: Arc<dyn FollowStore>,
}

impl FollowService {
    /// Maximum ids accepted by a single follow-status lookup
    pub const MAX_STATUS_BATCH: usize = 100;
    pub const DEFAULT_SUGGESTIONS: i64 = 10;
    pub const MAX_SUGGESTIONS: i64 = 50;

    pub fn new(store: Arc<dyn FollowStore>) -> Self {
        Self { store }
    }

    pub async fn health_check(&self) -> FollowResult<()> {
        self.store.health_check().await
    }

    /// Sync a user record from the identity service
    pub async fn upsert_user(&self, user_id: Uuid, username: &str) -> FollowResult<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(FollowError::InvalidInput("username must not be empty".into()));
        }
        self.store.upsert_user(user_id, username).await
    }

    /// Remove a user and its edges; counterparties' counters move in the same transaction.
    pub async fn delete_user(&self, user_id: Uuid) -> FollowResult<()> {
        self.store.delete_user(user_id).await?;
        info!(user_id = %user_id, "User deleted with its follow edges");
        Ok(())
    }

    /// Follow `following_id` as `follower_id`.
    pub async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<FollowChange> {
        let result = if follower_id == following_id {
            Err(FollowError::SelfFollowRejected)
        } else {
            self.store.follow(follower_id, following_id).await
        };
        observe("follow", follower_id, following_id, &result);
        result
    }

    /// Unfollow `following_id` as `follower_id`.
    pub async fn unfollow(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> FollowResult<FollowChange> {
        let result = if follower_id == following_id {
            Err(FollowError::SelfFollowRejected)
        } else {
            self.store.unfollow(follower_id, following_id).await
        };
        observe("unfollow", follower_id, following_id, &result);
        result
    }

    pub async fn counters(&self, user_id: Uuid) -> FollowResult<UserCounters> {
        self.store.counters(user_id).await
    }

    /// Profile of `user_id` as seen by `viewer` (anonymous when `None`)
    pub async fn profile(&self, user_id: Uuid, viewer: Option<Uuid>) -> FollowResult<UserProfile> {
        self.store.profile(user_id, viewer).await
    }

    pub async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<bool> {
        self.store.is_following(follower_id, following_id).await
    }

    /// Follow status for up to [`Self::MAX_STATUS_BATCH`] users in one call
    pub async fn following_status(
        &self,
        follower_id: Uuid,
        user_ids: &[Uuid],
    ) -> FollowResult<HashMap<Uuid, bool>> {
        if user_ids.len() > Self::MAX_STATUS_BATCH {
            return Err(FollowError::InvalidInput(format!(
                "Maximum {} user IDs allowed per request",
                Self::MAX_STATUS_BATCH
            )));
        }
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.store.following_status(follower_id, user_ids).await
    }

    pub async fn followers(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage> {
        self.store.followers(user_id, page).await
    }

    pub async fn following(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage> {
        self.store.following(user_id, page).await
    }

    pub async fn suggestions(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
    ) -> FollowResult<Vec<FollowSuggestion>> {
        let limit = limit
            .unwrap_or(Self::DEFAULT_SUGGESTIONS)
            .clamp(1, Self::MAX_SUGGESTIONS);
        self.store.suggestions(user_id, limit).await
    }

    /// Recompute every user's counters from the relationship table, one
    /// keyset page per transaction, correcting and auditing any drift.
    pub async fn reconcile_all(&self, batch_size: i64) -> FollowResult<ReconcileReport> {
        let batch_size = batch_size.max(1);
        let started = Instant::now();
        let mut report = ReconcileReport::default();
        let mut cursor: Option<Uuid> = None;

        loop {
            let batch = match self.store.reconcile_batch(cursor, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    metrics::record_reconcile_run("error", started.elapsed());
                    error!(
                        error = %e,
                        users_scanned = report.users_scanned,
                        "Counter reconciliation aborted"
                    );
                    return Err(e);
                }
            };

            audit(&batch.corrections);
            let exhausted = (batch.scanned as i64) < batch_size;
            cursor = batch.last_user_id;
            report.absorb(batch.scanned, batch.corrections);

            if exhausted || cursor.is_none() {
                break;
            }
        }

        metrics::record_reconcile_run("success", started.elapsed());
        if report.is_clean() {
            debug!(
                users_scanned = report.users_scanned,
                duration_ms = started.elapsed().as_millis() as u64,
                "Counter reconciliation found no drift"
            );
        } else {
            warn!(
                users_scanned = report.users_scanned,
                users_corrected = report.users_corrected,
                corrections = report.corrections.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Counter reconciliation corrected drift"
            );
        }
        Ok(report)
    }

    /// Recompute and correct a single user's counters
    pub async fn reconcile_user(&self, user_id: Uuid) -> FollowResult<ReconcileReport> {
        let corrections = self.store.reconcile_user(user_id).await?;
        audit(&corrections);

        let mut report = ReconcileReport::default();
        report.absorb(1, corrections);
        Ok(report)
    }
}

/// Every correction is logged on the `audit` target and counted.
fn audit(corrections: &[CounterCorrection]) {
    for correction in corrections {
        metrics::record_drift_correction(correction.counter);
        warn!(
            target: "audit",
            code = codes::COUNTER_DRIFT,
            user_id = %correction.user_id,
            counter = correction.counter.as_str(),
            stored = correction.stored,
            actual = correction.actual,
            "Corrected drifted follow counter"
        );
    }
}

fn observe(
    operation: &'static str,
    follower_id: Uuid,
    following_id: Uuid,
    result: &FollowResult<FollowChange>,
) {
    match result {
        Ok(change) => {
            metrics::record_operation(operation, "ok");
            info!(
                operation,
                follower_id = %follower_id,
                following_id = %following_id,
                followers_count = change.following.followers_count,
                following_count = change.follower.following_count,
                "Follow graph updated"
            );
        }
        Err(e @ (FollowError::Database(_) | FollowError::Internal(_))) => {
            metrics::record_operation(operation, e.code());
            error!(
                operation,
                follower_id = %follower_id,
                following_id = %following_id,
                error = %e,
                "Follow graph update rolled back"
            );
        }
        Err(e) => {
            metrics::record_operation(operation, e.code());
            debug!(
                operation,
                follower_id = %follower_id,
                following_id = %following_id,
                code = e.code(),
                "Follow graph update rejected"
            );
        }
    }
}
