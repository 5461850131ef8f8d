pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryFollowStore;
pub use postgres::PgFollowStore;
pub use store::FollowStore;

use crate::domain::models::{CounterCorrection, CounterKind, UserCounters};

/// Compare stored counters against the true counts from the relationship table.
pub(crate) fn diff_counters(
    stored: &UserCounters,
    actual_followers: i64,
    actual_following: i64,
) -> Vec<CounterCorrection> {
    let mut corrections = Vec::new();
    if stored.followers_count != actual_followers {
        corrections.push(CounterCorrection {
            user_id: stored.user_id,
            counter: CounterKind::FollowersCount,
            stored: stored.followers_count,
            actual: actual_followers,
        });
    }
    if stored.following_count != actual_following {
        corrections.push(CounterCorrection {
            user_id: stored.user_id,
            counter: CounterKind::FollowingCount,
            stored: stored.following_count,
            actual: actual_following,
        });
    }
    corrections
}
