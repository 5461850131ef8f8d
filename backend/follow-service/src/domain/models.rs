use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Denormalized follow counters stored on a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserCounters {
    pub user_id: Uuid,
    pub followers_count: i64,
    pub following_count: i64,
}

/// Result of a committed follow/unfollow: both sides' counters after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FollowChange {
    /// The acting user (its `following_count` moved)
    pub follower: UserCounters,
    /// The target user (its `followers_count` moved)
    pub following: UserCounters,
}

/// One row in a followers/following listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FollowEntry {
    pub user_id: Uuid,
    pub username: String,
    pub followed_at: DateTime<Utc>,
}

/// Paginated followers/following listing
#[derive(Debug, Clone, Serialize)]
pub struct FollowPage {
    pub entries: Vec<FollowEntry>,
    /// Denormalized counter value for the listed side
    pub total: i64,
    pub has_more: bool,
}

/// Candidate returned by the suggestions query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FollowSuggestion {
    pub user_id: Uuid,
    pub username: String,
    pub mutual_count: i64,
    pub followers_count: i64,
}

/// Public profile: stored counters plus whether the viewer follows this user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub followers_count: i64,
    pub following_count: i64,
    pub is_following: bool,
    pub created_at: DateTime<Utc>,
}

/// Limit/offset window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Build a window from optional query params, clamping limit to 1..=100 and offset to >= 0.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }

    pub fn has_more(&self, total: i64) -> bool {
        self.offset.saturating_add(self.limit) < total
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Which of the two denormalized counters a correction applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    FollowersCount,
    FollowingCount,
}

impl CounterKind {
    /// Column name, also used as the metrics label and audit value
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::FollowersCount => "followers_count",
            CounterKind::FollowingCount => "following_count",
        }
    }
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A drifted counter that reconciliation overwrote with the true value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterCorrection {
    pub user_id: Uuid,
    pub counter: CounterKind,
    pub stored: i64,
    pub actual: i64,
}

/// Outcome of reconciling one keyset page of users
#[derive(Debug, Clone, Default)]
pub struct ReconcileBatch {
    pub scanned: usize,
    /// Highest user id in this page; `None` once the table is exhausted
    pub last_user_id: Option<Uuid>,
    pub corrections: Vec<CounterCorrection>,
}

/// Aggregate outcome of a reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub users_scanned: usize,
    pub users_corrected: usize,
    pub corrections: Vec<CounterCorrection>,
}

impl ReconcileReport {
    pub fn absorb(&mut self, scanned: usize, corrections: Vec<CounterCorrection>) {
        self.users_scanned += scanned;
        let mut touched: Vec<Uuid> = corrections.iter().map(|c| c.user_id).collect();
        touched.sort_unstable();
        touched.dedup();
        self.users_corrected += touched.len();
        self.corrections.extend(corrections);
    }

    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
    }
}
