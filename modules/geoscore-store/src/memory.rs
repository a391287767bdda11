//! In-memory `ScoreStore` for tests. No database required. Thread-safe.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use geoscore_common::{
    AggregateBatch, AggregateRow, GeoAggregate, GeoLevel, GeoPair, GeoScoreError, NewUser,
    PartialScores, Result, UserGroupScore, UserRecord,
};

use crate::traits::ScoreStore;

#[derive(Default)]
struct Inner {
    users: BTreeMap<Uuid, UserRecord>,
    aggregates: Vec<GeoAggregate>,
    fail_writes: usize,
    fail_prunes: usize,
    busy_levels: HashSet<GeoLevel>,
}

#[derive(Default)]
pub struct MemoryScoreStore {
    inner: Mutex<Inner>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` batch writes (or observation updates) fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().fail_writes = n;
    }

    /// Make the next `n` prunes fail.
    pub fn fail_next_prunes(&self, n: usize) {
        self.lock().fail_prunes = n;
    }

    /// Act as if another writer holds `level`'s write lock: batch writes for
    /// it fail with `LevelBusy` until [`MemoryScoreStore::release_level`].
    pub fn hold_level(&self, level: GeoLevel) {
        self.lock().busy_levels.insert(level);
    }

    pub fn release_level(&self, level: GeoLevel) {
        self.lock().busy_levels.remove(&level);
    }

    /// Seed a snapshot row directly (e.g. an old batch for retention tests).
    pub fn insert_aggregate(&self, row: GeoAggregate) {
        self.lock().aggregates.push(row);
    }

    /// Every stored aggregate row of `level`, oldest first.
    pub fn aggregates(&self, level: GeoLevel) -> Vec<GeoAggregate> {
        let mut rows: Vec<_> = self
            .lock()
            .aggregates
            .iter()
            .filter(|a| a.geo_level == level)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.geo_identifier.cmp(&b.geo_identifier))
        });
        rows
    }

    pub fn user(&self, user_id: Uuid) -> Option<UserRecord> {
        self.lock().users.get(&user_id).cloned()
    }
}

fn simulated_failure(what: &str) -> GeoScoreError {
    GeoScoreError::Database(sqlx::Error::Protocol(format!("simulated {what} failure")))
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let mut inner = self.lock();
        if inner.users.contains_key(&user.user_id) {
            return Err(GeoScoreError::UserExists(user.user_id));
        }
        let record = UserRecord::registered(user, Utc::now());
        inner.users.insert(record.user_id, record.clone());
        Ok(record)
    }

    async fn apply_observation(
        &self,
        user_id: Uuid,
        observation: &PartialScores,
        now: DateTime<Utc>,
    ) -> Result<UserRecord> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&user_id) {
            return Err(GeoScoreError::UserNotFound(user_id));
        }
        if take_failure(&mut inner.fail_writes) {
            return Err(simulated_failure("write"));
        }
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(GeoScoreError::UserNotFound(user_id))?;
        user.record_observation(observation, now);
        Ok(user.clone())
    }

    async fn user_groups_by(&self, level: GeoLevel) -> Result<Vec<UserGroupScore>> {
        if level.user_column().is_none() {
            return Err(GeoScoreError::InvalidGeoLevel(level.to_string()));
        }
        Ok(self
            .lock()
            .users
            .values()
            .map(|u| UserGroupScore {
                geo_value: u.address.get(level).unwrap_or_default().to_string(),
                users: 1,
                scores: u.scores,
            })
            .collect())
    }

    async fn geo_pairs(&self, lower: GeoLevel) -> Result<Vec<GeoPair>> {
        let parent = lower
            .parent()
            .filter(|p| p.user_column().is_some())
            .ok_or_else(|| GeoScoreError::InvalidGeoLevel(lower.to_string()))?;

        let mut counts: HashMap<(String, String), i64> = HashMap::new();
        for user in self.lock().users.values() {
            let key = (
                user.address.get(lower).unwrap_or_default().to_string(),
                user.address.get(parent).unwrap_or_default().to_string(),
            );
            *counts.entry(key).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((lower, upper), users)| GeoPair { lower, upper, users })
            .collect())
    }

    async fn latest_batch_at(&self, level: GeoLevel) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .aggregates
            .iter()
            .filter(|a| a.geo_level == level)
            .map(|a| a.created_at)
            .max())
    }

    async fn latest_batch(&self, level: GeoLevel) -> Result<Option<AggregateBatch>> {
        let Some(created_at) = self.latest_batch_at(level).await? else {
            return Ok(None);
        };
        let mut rows: Vec<_> = self
            .lock()
            .aggregates
            .iter()
            .filter(|a| a.geo_level == level && a.created_at == created_at)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.geo_identifier.cmp(&b.geo_identifier));
        Ok(Some(AggregateBatch {
            geo_level: level,
            created_at,
            rows,
        }))
    }

    async fn latest_for(&self, level: GeoLevel, identifier: &str) -> Result<Option<GeoAggregate>> {
        Ok(self
            .lock()
            .aggregates
            .iter()
            .filter(|a| a.geo_level == level && a.geo_identifier == identifier)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn write_batch(
        &self,
        level: GeoLevel,
        created_at: DateTime<Utc>,
        rows: &[AggregateRow],
    ) -> Result<u64> {
        let mut inner = self.lock();
        if inner.busy_levels.contains(&level) {
            return Err(GeoScoreError::LevelBusy(level));
        }
        if take_failure(&mut inner.fail_writes) {
            return Err(simulated_failure("write"));
        }
        for row in rows {
            inner.aggregates.retain(|a| {
                !(a.geo_level == level
                    && a.geo_identifier == row.geo_identifier
                    && a.created_at == created_at)
            });
            inner.aggregates.push(GeoAggregate {
                geo_level: level,
                geo_identifier: row.geo_identifier.clone(),
                created_at,
                total_entities_contributing: row.total_entities_contributing,
                scores: row.scores,
            });
        }
        Ok(rows.len() as u64)
    }

    async fn prune_older_than(&self, level: GeoLevel, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock();
        if take_failure(&mut inner.fail_prunes) {
            return Err(simulated_failure("prune"));
        }
        let before = inner.aggregates.len();
        inner
            .aggregates
            .retain(|a| !(a.geo_level == level && a.created_at < cutoff));
        Ok((before - inner.aggregates.len()) as u64)
    }
}
