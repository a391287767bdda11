use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use geoscore_common::{
    AggregateBatch, AggregateRow, GeoAggregate, GeoLevel, GeoPair, NewUser, PartialScores,
    Result, UserGroupScore, UserRecord,
};

/// Storage operations the aggregation engine needs.
///
/// Implemented by `PgScoreStore` (postgres) and `MemoryScoreStore` (tests).
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Register a user with neutral scores and no observations.
    async fn create_user(&self, user: NewUser) -> Result<UserRecord>;

    /// Fold one observation into a user's running averages.
    ///
    /// Atomic: every axis and the counter move together, or nothing changes.
    /// Fails with `UserNotFound` for an unknown id; never creates the user.
    async fn apply_observation(
        &self,
        user_id: Uuid,
        observation: &PartialScores,
        now: DateTime<Utc>,
    ) -> Result<UserRecord>;

    /// Users grouped by raw attribute at `level`: count and per-axis mean.
    ///
    /// Values are not normalised, and the same value may appear in more than
    /// one entry; the collector trims and merges.
    async fn user_groups_by(&self, level: GeoLevel) -> Result<Vec<UserGroupScore>>;

    /// Distinct `(lower, parent)` attribute pairs among users, with user counts.
    async fn geo_pairs(&self, lower: GeoLevel) -> Result<Vec<GeoPair>>;

    /// Creation time of the newest batch at `level`.
    async fn latest_batch_at(&self, level: GeoLevel) -> Result<Option<DateTime<Utc>>>;

    /// All rows sharing the newest `created_at` at `level`.
    async fn latest_batch(&self, level: GeoLevel) -> Result<Option<AggregateBatch>>;

    /// Newest row for one identifier.
    async fn latest_for(&self, level: GeoLevel, identifier: &str) -> Result<Option<GeoAggregate>>;

    /// Persist one run's rows as a single snapshot batch.
    ///
    /// All-or-nothing. Fails with `LevelBusy` if another writer holds the
    /// level. Rewriting the same `(identifier, created_at)` replaces the row.
    async fn write_batch(
        &self,
        level: GeoLevel,
        created_at: DateTime<Utc>,
        rows: &[AggregateRow],
    ) -> Result<u64>;

    /// Delete rows of `level` created before `cutoff`. Returns rows deleted.
    async fn prune_older_than(&self, level: GeoLevel, cutoff: DateTime<Utc>) -> Result<u64>;
}
