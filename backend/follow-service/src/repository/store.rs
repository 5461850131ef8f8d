use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::models::{
    CounterCorrection, FollowChange, FollowPage, FollowSuggestion, PageRequest, ReconcileBatch,
    UserCounters, UserProfile,
};
use crate::error::FollowResult;

/// Storage seam for the follow graph and its denormalized counters.
///
/// Implementations must apply each relationship mutation and both counter
/// adjustments as one atomic unit: a caller can never observe a follow row
/// without its counter change, or the reverse.
#[async_trait::async_trait]
pub trait FollowStore: Send + Sync {
    /// Create or rename a user (fed by the identity service)
    async fn upsert_user(&self, user_id: Uuid, username: &str) -> FollowResult<()>;

    /// Hard-delete a user together with its relationships.
    ///
    /// Every counterparty's counter loses the removed edge in the same atomic
    /// unit, floored at zero.
    async fn delete_user(&self, user_id: Uuid) -> FollowResult<()>;

    /// Insert (follower -> following) and bump both counters.
    ///
    /// Fails with `DuplicateRelationship` if the pair exists, `UserNotFound`
    /// if either user is missing.
    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<FollowChange>;

    /// Delete (follower -> following) and decrement both counters, floored at zero.
    ///
    /// Fails with `RelationshipNotFound` if the pair does not exist.
    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid)
        -> FollowResult<FollowChange>;

    /// Stored counters for a user
    async fn counters(&self, user_id: Uuid) -> FollowResult<UserCounters>;

    /// Username and counters for a user; `is_following` is relative to `viewer`
    async fn profile(&self, user_id: Uuid, viewer: Option<Uuid>) -> FollowResult<UserProfile>;

    /// Check if follower is following followee
    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<bool>;

    /// Batch follow status; every requested id appears in the result
    async fn following_status(
        &self,
        follower_id: Uuid,
        user_ids: &[Uuid],
    ) -> FollowResult<HashMap<Uuid, bool>>;

    /// Users following `user_id`, newest first
    async fn followers(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage>;

    /// Users `user_id` follows, newest first
    async fn following(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage>;

    /// Friends-of-friends not yet followed, ranked by mutual connections
    async fn suggestions(&self, user_id: Uuid, limit: i64)
        -> FollowResult<Vec<FollowSuggestion>>;

    /// Recount and correct up to `limit` users with id > `after`, in one transaction.
    async fn reconcile_batch(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> FollowResult<ReconcileBatch>;

    /// Recount and correct a single user
    async fn reconcile_user(&self, user_id: Uuid) -> FollowResult<Vec<CounterCorrection>>;

    /// Health check (optional)
    async fn health_check(&self) -> FollowResult<()> {
        Ok(())
    }
}

/// Lock/update order for a pair of users. Locking in a fixed order keeps
/// A->B and B->A from deadlocking each other.
pub(crate) fn lock_order(a: Uuid, b: Uuid) -> [Uuid; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(lock_order(a, b), lock_order(b, a));
        let [first, second] = lock_order(a, b);
        assert!(first <= second);
    }
}
