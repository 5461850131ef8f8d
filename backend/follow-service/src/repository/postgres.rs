use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::store::{lock_order, FollowStore};
use super::diff_counters;
use crate::domain::models::{
    CounterCorrection, CounterKind, FollowChange, FollowEntry, FollowPage, FollowSuggestion,
    PageRequest, ReconcileBatch, UserCounters, UserProfile,
};
use crate::error::{FollowError, FollowResult};
use crate::metrics;

const COUNTER_COLUMNS: &str = "id AS user_id, \
     followers_count::BIGINT AS followers_count, \
     following_count::BIGINT AS following_count";

/// Attempts to lock a deleted user's counterparties before giving up
const DELETE_LOCK_ATTEMPTS: usize = 8;

/// PostgreSQL follow store (source of truth).
///
/// Every mutation runs in a single transaction that first locks the affected
/// user rows in id order, then touches `follows`, then applies relative
/// counter updates.
#[derive(Clone)]
pub struct PgFollowStore {
    pool: PgPool,
}

impl PgFollowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock both user rows (ascending id) and return their current counters.
    async fn lock_pair(
        tx: &mut Transaction<'_, Postgres>,
        a: Uuid,
        b: Uuid,
    ) -> FollowResult<(UserCounters, UserCounters)> {
        let ids = lock_order(a, b);
        let rows: Vec<UserCounters> = sqlx::query_as(&format!(
            "SELECT {COUNTER_COLUMNS} FROM users WHERE id = ANY($1) ORDER BY id FOR NO KEY UPDATE"
        ))
        .bind(&ids[..])
        .fetch_all(&mut **tx)
        .await?;

        let mut by_id: HashMap<Uuid, UserCounters> =
            rows.into_iter().map(|row| (row.user_id, row)).collect();

        // A missing target is reported ahead of a missing actor.
        let second = by_id.remove(&b).ok_or(FollowError::UserNotFound(b))?;
        let first = by_id.remove(&a).ok_or(FollowError::UserNotFound(a))?;
        Ok((first, second))
    }

    /// Users following `user_id` and users `user_id` follows.
    async fn edges_of(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> FollowResult<(Vec<Uuid>, Vec<Uuid>)> {
        let followers: Vec<Uuid> =
            sqlx::query_scalar("SELECT follower_id FROM follows WHERE following_id = $1")
                .bind(user_id)
                .fetch_all(&mut **tx)
                .await?;
        let following: Vec<Uuid> =
            sqlx::query_scalar("SELECT following_id FROM follows WHERE follower_id = $1")
                .bind(user_id)
                .fetch_all(&mut **tx)
                .await?;
        Ok((followers, following))
    }

    async fn counters_for_update(
        tx: &mut Transaction<'_, Postgres>,
        after: Option<Uuid>,
        limit: i64,
    ) -> FollowResult<Vec<UserCounters>> {
        let rows = sqlx::query_as(&format!(
            "SELECT {COUNTER_COLUMNS} FROM users \
             WHERE ($1::uuid IS NULL OR id > $1) \
             ORDER BY id LIMIT $2 FOR NO KEY UPDATE"
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    /// True counts from `follows` for the given users, keyed by id.
    async fn actual_counts(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
    ) -> FollowResult<(HashMap<Uuid, i64>, HashMap<Uuid, i64>)> {
        let followers: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT following_id, COUNT(*)
            FROM follows
            WHERE following_id = ANY($1)
            GROUP BY following_id
            "#,
        )
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        let following: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT follower_id, COUNT(*)
            FROM follows
            WHERE follower_id = ANY($1)
            GROUP BY follower_id
            "#,
        )
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok((
            followers.into_iter().collect(),
            following.into_iter().collect(),
        ))
    }

    /// Overwrite drifted counters and record one audit row per correction.
    async fn apply_corrections(
        tx: &mut Transaction<'_, Postgres>,
        corrections: &[CounterCorrection],
    ) -> FollowResult<()> {
        for correction in corrections {
            let update = match correction.counter {
                CounterKind::FollowersCount => {
                    "UPDATE users SET followers_count = $2, updated_at = NOW() WHERE id = $1"
                }
                CounterKind::FollowingCount => {
                    "UPDATE users SET following_count = $2, updated_at = NOW() WHERE id = $1"
                }
            };
            sqlx::query(update)
                .bind(correction.user_id)
                .bind(to_db_count(correction.actual)?)
                .execute(&mut **tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO counter_drift_audit (user_id, counter, stored_value, actual_value, detected_at)
                VALUES ($1, $2, $3, $4, NOW())
                "#,
            )
            .bind(correction.user_id)
            .bind(correction.counter.as_str())
            .bind(to_db_count(correction.stored)?)
            .bind(to_db_count(correction.actual)?)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn list(
        &self,
        user_id: Uuid,
        page: PageRequest,
        kind: CounterKind,
    ) -> FollowResult<FollowPage> {
        let counters = self.counters(user_id).await?;

        // Followers of X are rows where following_id = X; the listed user is the other side.
        let (total, sql) = match kind {
            CounterKind::FollowersCount => (
                counters.followers_count,
                r#"
                SELECT f.follower_id AS user_id, u.username, f.created_at AS followed_at
                FROM follows f
                JOIN users u ON u.id = f.follower_id
                WHERE f.following_id = $1
                ORDER BY f.created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            ),
            CounterKind::FollowingCount => (
                counters.following_count,
                r#"
                SELECT f.following_id AS user_id, u.username, f.created_at AS followed_at
                FROM follows f
                JOIN users u ON u.id = f.following_id
                WHERE f.follower_id = $1
                ORDER BY f.created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            ),
        };

        let entries: Vec<FollowEntry> = sqlx::query_as(sql)
            .bind(user_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(FollowPage {
            entries,
            total,
            has_more: page.has_more(total),
        })
    }
}

/// Counters are INTEGER columns; refuse values that would not round-trip.
fn to_db_count(value: i64) -> FollowResult<i32> {
    i32::try_from(value)
        .map_err(|_| FollowError::Internal(format!("counter value {} out of range", value)))
}

/// Translate constraint violations raised inside a follow insert.
fn map_follow_insert_error(err: sqlx::Error, follower_id: Uuid, following_id: Uuid) -> FollowError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return FollowError::DuplicateRelationship {
                follower_id,
                following_id,
            };
        }
        if db_err.is_check_violation() {
            return FollowError::SelfFollowRejected;
        }
        if db_err.is_foreign_key_violation() {
            return FollowError::UserNotFound(following_id);
        }
    }
    FollowError::Database(err)
}

fn split_change(
    rows: Vec<UserCounters>,
    follower_id: Uuid,
    following_id: Uuid,
) -> FollowResult<FollowChange> {
    let mut by_id: HashMap<Uuid, UserCounters> =
        rows.into_iter().map(|row| (row.user_id, row)).collect();
    let follower = by_id
        .remove(&follower_id)
        .ok_or_else(|| FollowError::Internal(format!("counter row for {} vanished", follower_id)))?;
    let following = by_id
        .remove(&following_id)
        .ok_or_else(|| FollowError::Internal(format!("counter row for {} vanished", following_id)))?;
    Ok(FollowChange {
        follower,
        following,
    })
}

#[async_trait::async_trait]
impl FollowStore for PgFollowStore {
    async fn upsert_user(&self, user_id: Uuid, username: &str) -> FollowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(username)
        .execute(&self.pool)
        .await?;

        debug!("Upserted user in PostgreSQL: {} ({})", user_id, username);
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> FollowResult<()> {
        for _ in 0..DELETE_LOCK_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            let (followers, following) = Self::edges_of(&mut tx, user_id).await?;
            let mut ids: Vec<Uuid> = followers
                .iter()
                .chain(following.iter())
                .copied()
                .chain(std::iter::once(user_id))
                .collect();
            ids.sort_unstable();
            ids.dedup();

            let locked: HashMap<Uuid, UserCounters> = sqlx::query_as::<_, UserCounters>(&format!(
                "SELECT {COUNTER_COLUMNS} FROM users WHERE id = ANY($1) ORDER BY id FOR NO KEY UPDATE"
            ))
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| (row.user_id, row))
            .collect();

            if !locked.contains_key(&user_id) {
                return Err(FollowError::UserNotFound(user_id));
            }

            // With the user row locked its edges are frozen; retry if one
            // appeared between the first read and the lock.
            let (followers, following) = Self::edges_of(&mut tx, user_id).await?;
            if followers
                .iter()
                .chain(following.iter())
                .any(|id| ids.binary_search(id).is_err())
            {
                tx.rollback().await?;
                continue;
            }

            for id in &followers {
                if locked.get(id).is_some_and(|row| row.following_count == 0) {
                    metrics::record_floor_hit(*id, CounterKind::FollowingCount);
                }
            }
            for id in &following {
                if locked.get(id).is_some_and(|row| row.followers_count == 0) {
                    metrics::record_floor_hit(*id, CounterKind::FollowersCount);
                }
            }

            sqlx::query(
                r#"
                UPDATE users SET
                    following_count = GREATEST(following_count - 1, 0),
                    updated_at = NOW()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&followers)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE users SET
                    followers_count = GREATEST(followers_count - 1, 0),
                    updated_at = NOW()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&following)
            .execute(&mut *tx)
            .await?;

            // follows rows go with the user via ON DELETE CASCADE
            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            debug!(
                "Deleted user in PostgreSQL: {} ({} followers, {} following released)",
                user_id,
                followers.len(),
                following.len()
            );
            return Ok(());
        }

        Err(FollowError::Internal(format!(
            "relationships of user {} kept changing during delete",
            user_id
        )))
    }

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<FollowChange> {
        if follower_id == following_id {
            return Err(FollowError::SelfFollowRejected);
        }

        let mut tx = self.pool.begin().await?;
        Self::lock_pair(&mut tx, follower_id, following_id).await?;

        let inserted: Option<(chrono::DateTime<chrono::Utc>,)> = sqlx::query_as(
            r#"
            INSERT INTO follows (follower_id, following_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (follower_id, following_id) DO NOTHING
            RETURNING created_at
            "#,
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_follow_insert_error(e, follower_id, following_id))?;

        if inserted.is_none() {
            // Dropping the transaction rolls it back; no counter moved.
            return Err(FollowError::DuplicateRelationship {
                follower_id,
                following_id,
            });
        }

        let rows: Vec<UserCounters> = sqlx::query_as(&format!(
            r#"
            UPDATE users SET
                followers_count = followers_count + CASE WHEN id = $2 THEN 1 ELSE 0 END,
                following_count = following_count + CASE WHEN id = $1 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE id IN ($1, $2)
            RETURNING {COUNTER_COLUMNS}
            "#
        ))
        .bind(follower_id)
        .bind(following_id)
        .fetch_all(&mut *tx)
        .await?;

        let change = split_change(rows, follower_id, following_id)?;
        tx.commit().await?;

        debug!(
            "Created FOLLOWS in PostgreSQL: {} -> {}",
            follower_id, following_id
        );
        Ok(change)
    }

    async fn unfollow(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> FollowResult<FollowChange> {
        if follower_id == following_id {
            return Err(FollowError::SelfFollowRejected);
        }

        let mut tx = self.pool.begin().await?;
        let (follower, following) = Self::lock_pair(&mut tx, follower_id, following_id).await?;

        let affected = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
            .bind(follower_id)
            .bind(following_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(FollowError::RelationshipNotFound {
                follower_id,
                following_id,
            });
        }

        // Rows are locked, so these pre-values are exactly what the clamp sees.
        if follower.following_count == 0 {
            metrics::record_floor_hit(follower_id, CounterKind::FollowingCount);
        }
        if following.followers_count == 0 {
            metrics::record_floor_hit(following_id, CounterKind::FollowersCount);
        }

        let rows: Vec<UserCounters> = sqlx::query_as(&format!(
            r#"
            UPDATE users SET
                followers_count = GREATEST(followers_count - CASE WHEN id = $2 THEN 1 ELSE 0 END, 0),
                following_count = GREATEST(following_count - CASE WHEN id = $1 THEN 1 ELSE 0 END, 0),
                updated_at = NOW()
            WHERE id IN ($1, $2)
            RETURNING {COUNTER_COLUMNS}
            "#
        ))
        .bind(follower_id)
        .bind(following_id)
        .fetch_all(&mut *tx)
        .await?;

        let change = split_change(rows, follower_id, following_id)?;
        tx.commit().await?;

        debug!(
            "Deleted FOLLOWS in PostgreSQL: {} -> {}",
            follower_id, following_id
        );
        Ok(change)
    }

    async fn counters(&self, user_id: Uuid) -> FollowResult<UserCounters> {
        sqlx::query_as(&format!("SELECT {COUNTER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(FollowError::UserNotFound(user_id))
    }

    async fn profile(&self, user_id: Uuid, viewer: Option<Uuid>) -> FollowResult<UserProfile> {
        let row: Option<(String, i64, i64, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            r#"
            SELECT username, followers_count::BIGINT, following_count::BIGINT, created_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        let (username, followers_count, following_count, created_at) =
            row.ok_or(FollowError::UserNotFound(user_id))?;

        let is_following = match viewer {
            Some(viewer) if viewer != user_id => self.is_following(viewer, user_id).await?,
            _ => false,
        };

        Ok(UserProfile {
            user_id,
            username,
            followers_count,
            following_count,
            is_following,
            created_at,
        })
    }

    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> FollowResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2)",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn following_status(
        &self,
        follower_id: Uuid,
        user_ids: &[Uuid],
    ) -> FollowResult<HashMap<Uuid, bool>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let followed: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT following_id FROM follows
            WHERE follower_id = $1 AND following_id = ANY($2)
            "#,
        )
        .bind(follower_id)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        let followed: std::collections::HashSet<Uuid> = followed.into_iter().collect();
        Ok(user_ids
            .iter()
            .map(|id| (*id, followed.contains(id)))
            .collect())
    }

    async fn followers(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage> {
        self.list(user_id, page, CounterKind::FollowersCount).await
    }

    async fn following(&self, user_id: Uuid, page: PageRequest) -> FollowResult<FollowPage> {
        self.list(user_id, page, CounterKind::FollowingCount).await
    }

    async fn suggestions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> FollowResult<Vec<FollowSuggestion>> {
        let suggestions = sqlx::query_as(
            r#"
            SELECT
                u.id AS user_id,
                u.username,
                COUNT(DISTINCT f2.follower_id) AS mutual_count,
                u.followers_count::BIGINT AS followers_count
            FROM follows f1
            JOIN follows f2 ON f1.following_id = f2.follower_id
            JOIN users u ON f2.following_id = u.id
            WHERE f1.follower_id = $1
              AND f2.following_id <> $1
              AND NOT EXISTS (
                  SELECT 1 FROM follows
                  WHERE follower_id = $1 AND following_id = f2.following_id
              )
            GROUP BY u.id
            ORDER BY mutual_count DESC, u.followers_count DESC, u.id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(suggestions)
    }

    async fn reconcile_batch(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> FollowResult<ReconcileBatch> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::counters_for_update(&mut tx, after, limit).await?;

        let Some(last) = stored.last().map(|row| row.user_id) else {
            tx.commit().await?;
            return Ok(ReconcileBatch::default());
        };

        let ids: Vec<Uuid> = stored.iter().map(|row| row.user_id).collect();
        let (followers, following) = Self::actual_counts(&mut tx, &ids).await?;

        let corrections: Vec<CounterCorrection> = stored
            .iter()
            .flat_map(|row| {
                diff_counters(
                    row,
                    followers.get(&row.user_id).copied().unwrap_or(0),
                    following.get(&row.user_id).copied().unwrap_or(0),
                )
            })
            .collect();

        Self::apply_corrections(&mut tx, &corrections).await?;
        tx.commit().await?;

        Ok(ReconcileBatch {
            scanned: stored.len(),
            last_user_id: Some(last),
            corrections,
        })
    }

    async fn reconcile_user(&self, user_id: Uuid) -> FollowResult<Vec<CounterCorrection>> {
        let mut tx = self.pool.begin().await?;

        let stored: UserCounters = sqlx::query_as(&format!(
            "SELECT {COUNTER_COLUMNS} FROM users WHERE id = $1 FOR NO KEY UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(FollowError::UserNotFound(user_id))?;

        let (followers, following) = Self::actual_counts(&mut tx, &[user_id]).await?;
        let corrections = diff_counters(
            &stored,
            followers.get(&user_id).copied().unwrap_or(0),
            following.get(&user_id).copied().unwrap_or(0),
        );

        Self::apply_corrections(&mut tx, &corrections).await?;
        tx.commit().await?;
        Ok(corrections)
    }

    async fn health_check(&self) -> FollowResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
