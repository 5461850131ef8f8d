use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::diff_counters;
use super::store::FollowStore;
use crate::domain::models::{
    CounterCorrection, CounterKind, FollowChange, FollowEntry, FollowPage, FollowSuggestion,
    PageRequest, ReconcileBatch, UserCounters, UserProfile,
};
use crate::error::{FollowError, FollowResult};
use crate::metrics;

#[derive(Debug, Clone)]
struct UserRecord {
    username: String,
    followers_count: i64,
    following_count: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct EdgeRecord {
    created_at: DateTime<Utc>,
    /// Insertion sequence; breaks ties between rows created in the same instant
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, UserRecord>,
    follows: HashMap<(Uuid, Uuid), EdgeRecord>,
    audit: Vec<CounterCorrection>,
    next_seq: u64,
}

impl State {
    fn counters(&self, user_id: Uuid) -> FollowResult<UserCounters> {
        self.users
            .get(&user_id)
            .map(|u| UserCounters {
                user_id,
                followers_count: u.followers_count,
                following_count: u.following_count,
            })
            .ok_or(FollowError::UserNotFound(user_id))
    }

    fn ensure_pair(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<()> {
        for id in [following_id, follower_id] {
            if !self.users.contains_key(&id) {
                return Err(FollowError::UserNotFound(id));
            }
        }
        Ok(())
    }

    fn change(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<FollowChange> {
        Ok(FollowChange {
            follower: self.counters(follower_id)?,
            following: self.counters(following_id)?,
        })
    }

    fn actual_counts(&self, user_id: Uuid) -> (i64, i64) {
        let followers = self.follows.keys().filter(|(_, to)| *to == user_id).count();
        let following = self.follows.keys().filter(|(from, _)| *from == user_id).count();
        (followers as i64, following as i64)
    }

    fn reconcile(&mut self, user_id: Uuid) -> FollowResult<Vec<CounterCorrection>> {
        let stored = self.counters(user_id)?;
        let (followers, following) = self.actual_counts(user_id);
        let corrections = diff_counters(&stored, followers, following);

        if let Some(user) = self.users.get_mut(&user_id) {
            for correction in &corrections {
                match correction.counter {
                    CounterKind::FollowersCount => user.followers_count = correction.actual,
                    CounterKind::FollowingCount => user.following_count = correction.actual,
                }
            }
        }
        self.audit.extend(corrections.iter().copied());
        Ok(corrections)
    }

    fn list(&self, user_id: Uuid, page: PageRequest, kind: CounterKind) -> FollowResult<FollowPage> {
        let counters = self.counters(user_id)?;
        let total = match kind {
            CounterKind::FollowersCount => counters.followers_count,
            CounterKind::FollowingCount => counters.following_count,
        };

        let mut rows: Vec<(Uuid, EdgeRecord)> = self
            .follows
            .iter()
            .filter_map(|((from, to), edge)| match kind {
                CounterKind::FollowersCount if *to == user_id => Some((*from, *edge)),
                CounterKind::FollowingCount if *from == user_id => Some((*to, *edge)),
                _ => None,
            })
            .collect();
        rows.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));

        let entries = rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .filter_map(|(id, edge)| {
                let user = self.users.get(&id)?;
                Some(FollowEntry {
                    user_id: id,
                    username: user.username.clone(),
                    followed_at: edge.created_at,
                })
            })
            .collect();

        Ok(FollowPage {
            entries,
            total,
            has_more: page.has_more(total),
        })
    }
}

/// In-process follow store with the same atomicity contract as the
/// PostgreSQL store: every operation runs under one lock, so a relationship
/// change and its counter changes are observed together or not at all.
#[derive(Debug, Default)]
pub struct InMemoryFollowStore {
    state: Mutex<State>,
}

impl InMemoryFollowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite stored counters without touching relationships.
    ///
    /// Simulates out-of-band corruption for recovery drills and tests.
    pub async fn inject_drift(
        &self,
        user_id: Uuid,
        followers_count: i64,
        following_count: i64,
    ) -> FollowResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(FollowError::UserNotFound(user_id))?;
        user.followers_count = followers_count.max(0);
        user.following_count = following_count.max(0);
        Ok(())
    }

    /// Corrections recorded by reconciliation, oldest first
    pub async fn audit_log(&self) -> Vec<CounterCorrection> {
        self.state.lock().await.audit.clone()
    }

    /// Number of relationship rows
    pub async fn relationship_count(&self) -> usize {
        self.state.lock().await.follows.len()
    }
}

#[async_trait::async_trait]
impl FollowStore for InMemoryFollowStore {
    async fn upsert_user(&self, user_id: Uuid, username: &str) -> FollowResult<()> {
        let mut state = self.state.lock().await;
        state
            .users
            .entry(user_id)
            .and_modify(|u| u.username = username.to_string())
            .or_insert_with(|| UserRecord {
                username: username.to_string(),
                followers_count: 0,
                following_count: 0,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> FollowResult<()> {
        let mut state = self.state.lock().await;
        if state.users.remove(&user_id).is_none() {
            return Err(FollowError::UserNotFound(user_id));
        }

        let removed: Vec<(Uuid, Uuid)> = state
            .follows
            .keys()
            .filter(|(from, to)| *from == user_id || *to == user_id)
            .copied()
            .collect();

        for (from, to) in removed {
            state.follows.remove(&(from, to));
            if from == user_id {
                if let Some(target) = state.users.get_mut(&to) {
                    if target.followers_count == 0 {
                        metrics::record_floor_hit(to, CounterKind::FollowersCount);
                    }
                    target.followers_count = (target.followers_count - 1).max(0);
                }
            } else if let Some(actor) = state.users.get_mut(&from) {
                if actor.following_count == 0 {
                    metrics::record_floor_hit(from, CounterKind::FollowingCount);
                }
                actor.following_count = (actor.following_count - 1).max(0);
            }
        }
        Ok(())
    }

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<FollowChange> {
        if follower_id == following_id {
            return Err(FollowError::SelfFollowRejected);
        }

        let mut state = self.state.lock().await;
        state.ensure_pair(follower_id, following_id)?;

        if state.follows.contains_key(&(follower_id, following_id)) {
            return Err(FollowError::DuplicateRelationship {
                follower_id,
                following_id,
            });
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.follows.insert(
            (follower_id, following_id),
            EdgeRecord {
                created_at: Utc::now(),
                seq,
            },
        );

        if let Some(target) = state.users.get_mut(&following_id) {
            target.followers_count += 1;
        }
        if let Some(actor) = state.users.get_mut(&follower_id) {
            actor.following_count += 1;
        }

        state.change(follower_id, following_id)
    }

    async fn unfollow(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> FollowResult<FollowChange> {
        if follower_id == following_id {
            return Err(FollowError::SelfFollowRejected);
        }

        let mut state = self.state.lock().await;
        state.ensure_pair(follower_id, following_id)?;

        if state.follows.remove(&(follower_id, following_id)).is_none() {
            return Err(FollowError::RelationshipNotFound {
                follower_id,
                following_id,
            });
        }

        if let Some(target) = state.users.get_mut(&following_id) {
            if target.followers_count == 0 {
                metrics::record_floor_hit(following_id, CounterKind::FollowersCount);
            }
            target.followers_count = (target.followers_count - 1).max(0);
        }
        if let Some(actor) = state.users.get_mut(&follower_id) {
            if actor.following_count == 0 {
                metrics::record_floor_hit(follower_id, CounterKind::FollowingCount);
            }
            actor.following_count = (actor.following_count - 1).max(0);
        }

        state.change(follower_id, following_id)
    }

    async fn counters(&self, user_id: Uuid) -> FollowResult<UserCounters> {
        self.state.lock().await.counters(user_id)
    }

    async fn profile(&self, user_id: Uuid, viewer: Option<Uuid>) -> FollowResult<UserProfile> {
        let state = self.state.lock().await;
        let user = state
            .users
            .get(&user_id)
            .ok_or(FollowError::UserNotFound(user_id))?;
        let is_following = viewer
            .is_some_and(|viewer| state.follows.contains_key(&(viewer, user_id)));

        Ok(UserProfile {
            user_id,
            username: user.username.clone(),
            followers_count: user.followers_count,
            following_count: user.following_count,
            is_following,
            created_at: user.created_at,
        })
    }

    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .follows
            .contains_key(&(follower_id, following_id)))
    }

    async fn following_status(
        &self,
        follower_id: Uuid,
        user_ids: &[Uuid],
    ) -> FollowResult<HashMap<Uuid, bool>> {
        let state = self.state.lock().await;
        Ok(user_ids
            .iter()
            .map(|id| (*id, state.follows.contains_key(&(follower_id, *id))))
            .collect())
    }

    async fn followers(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage> {
        self.state
            .lock()
            .await
            .list(user_id, page, CounterKind::FollowersCount)
    }

    async fn following(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage> {
        self.state
            .lock()
            .await
            .list(user_id, page, CounterKind::FollowingCount)
    }

    async fn suggestions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> FollowResult<Vec<FollowSuggestion>> {
        let state = self.state.lock().await;

        let followed: HashSet<Uuid> = state
            .follows
            .keys()
            .filter(|(from, _)| *from == user_id)
            .map(|(_, to)| *to)
            .collect();

        // candidate -> set of followed users who follow the candidate
        let mut mutuals: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        for (from, to) in state.follows.keys() {
            if followed.contains(from) && *to != user_id && !followed.contains(to) {
                mutuals.entry(*to).or_default().insert(*from);
            }
        }

        let mut suggestions: Vec<FollowSuggestion> = mutuals
            .into_iter()
            .filter_map(|(candidate, via)| {
                let user = state.users.get(&candidate)?;
                Some(FollowSuggestion {
                    user_id: candidate,
                    username: user.username.clone(),
                    mutual_count: via.len() as i64,
                    followers_count: user.followers_count,
                })
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.mutual_count
                .cmp(&a.mutual_count)
                .then(b.followers_count.cmp(&a.followers_count))
                .then(a.user_id.cmp(&b.user_id))
        });
        suggestions.truncate(limit.max(0) as usize);
        Ok(suggestions)
    }

    async fn reconcile_batch(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> FollowResult<ReconcileBatch> {
        let mut state = self.state.lock().await;

        let mut ids: Vec<Uuid> = state
            .users
            .keys()
            .copied()
            .filter(|id| after.map_or(true, |after| *id > after))
            .collect();
        ids.sort_unstable();
        ids.truncate(limit.max(0) as usize);

        let mut corrections = Vec::new();
        for id in &ids {
            corrections.extend(state.reconcile(*id)?);
        }

        Ok(ReconcileBatch {
            scanned: ids.len(),
            last_user_id: ids.last().copied(),
            corrections,
        })
    }

    async fn reconcile_user(&self, user_id: Uuid) -> FollowResult<Vec<CounterCorrection>> {
        self.state.lock().await.reconcile(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(n: usize) -> (InMemoryFollowStore, Vec<Uuid>) {
        let store = InMemoryFollowStore::new();
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            let id = Uuid::new_v4();
            store.upsert_user(id, &format!("user{}", i)).await.unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn test_follow_rejects_unknown_target() {
        let (store, ids) = seeded(1).await;
        let ghost = Uuid::new_v4();

        let err = store.follow(ids[0], ghost).await.unwrap_err();
        assert!(matches!(err, FollowError::UserNotFound(id) if id == ghost));
        assert_eq!(store.counters(ids[0]).await.unwrap().following_count, 0);
        assert_eq!(store.relationship_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_user_releases_counterparty_counters() {
        let (store, ids) = seeded(3).await;
        store.follow(ids[0], ids[1]).await.unwrap();
        store.follow(ids[1], ids[0]).await.unwrap();
        store.follow(ids[2], ids[0]).await.unwrap();

        store.delete_user(ids[0]).await.unwrap();

        assert_eq!(store.relationship_count().await, 0);
        let b = store.counters(ids[1]).await.unwrap();
        assert_eq!((b.followers_count, b.following_count), (0, 0));
        let c = store.counters(ids[2]).await.unwrap();
        assert_eq!((c.followers_count, c.following_count), (0, 0));

        assert!(store.reconcile_user(ids[1]).await.unwrap().is_empty());
        assert!(store.audit_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_profile_reports_viewer_relationship() {
        let (store, ids) = seeded(2).await;
        store.follow(ids[0], ids[1]).await.unwrap();

        let profile = store.profile(ids[1], Some(ids[0])).await.unwrap();
        assert_eq!(profile.username, "user1");
        assert_eq!(profile.followers_count, 1);
        assert!(profile.is_following);

        assert!(!store.profile(ids[0], Some(ids[1])).await.unwrap().is_following);
        assert!(!store.profile(ids[1], None).await.unwrap().is_following);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let (store, ids) = seeded(4).await;
        for follower in &ids[1..] {
            store.follow(*follower, ids[0]).await.unwrap();
        }

        let page = store
            .followers(ids[0], PageRequest::new(Some(2), None))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_more);
        let listed: Vec<Uuid> = page.entries.iter().map(|e| e.user_id).collect();
        assert_eq!(listed, vec![ids[3], ids[2]]);

        let page = store
            .followers(ids[0], PageRequest::new(Some(2), Some(2)))
            .await
            .unwrap();
        assert!(!page.has_more);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].user_id, ids[1]);
    }
}
