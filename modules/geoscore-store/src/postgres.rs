//! Postgres-backed `ScoreStore` over the `users` and `geo_aggregates` tables.
//!
//! Column lists are composed once from the compiled axis list and the
//! `GeoLevel` column allow-list. Values are always bound parameters.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use geoscore_common::{
    axis_column, AggregateBatch, AggregateRow, GeoAddress, GeoAggregate, GeoLevel, GeoPair,
    GeoScoreError, NewUser, PartialScores, Result, ScoreVector, UserGroupScore, UserRecord,
    AXIS_COUNT,
};

use crate::traits::ScoreStore;

/// First key of the two-key advisory lock taken per level while writing.
/// The second key is [`GeoLevel::index`].
pub const LEVEL_LOCK_NAMESPACE: i32 = 0x6765_6f73;

static AXIS_COLUMNS: LazyLock<Vec<String>> =
    LazyLock::new(|| (0..AXIS_COUNT).map(axis_column).collect());

/// `avg_a, avg_b, ...`
static AXIS_COLUMN_LIST: LazyLock<String> = LazyLock::new(|| AXIS_COLUMNS.join(", "));

static USER_COLUMNS: LazyLock<String> = LazyLock::new(|| {
    format!(
        "user_id, pincode, city, district, state, country, total_observations, updated_at, {}",
        *AXIS_COLUMN_LIST
    )
});

static AGGREGATE_COLUMNS: LazyLock<String> = LazyLock::new(|| {
    format!(
        "geo_identifier, created_at, total_entities_contributing, {}",
        *AXIS_COLUMN_LIST
    )
});

/// `AVG(avg_a) AS avg_a, ...` for grouped user reads.
static AXIS_AVERAGES: LazyLock<String> = LazyLock::new(|| {
    AXIS_COLUMNS
        .iter()
        .map(|col| format!("AVG({col}) AS {col}"))
        .collect::<Vec<_>>()
        .join(", ")
});

/// `UPDATE users SET avg_a = $2, ... WHERE user_id = $1`
static UPDATE_USER_SCORES: LazyLock<String> = LazyLock::new(|| {
    let sets: Vec<String> = AXIS_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ${}", i + 2))
        .collect();
    format!(
        "UPDATE users SET {}, total_observations = ${}, updated_at = ${} WHERE user_id = $1",
        sets.join(", "),
        AXIS_COUNT + 2,
        AXIS_COUNT + 3
    )
});

/// Snapshot insert. Re-running with the same `created_at` replaces the row.
static UPSERT_AGGREGATE: LazyLock<String> = LazyLock::new(|| {
    let placeholders: Vec<String> = (0..AXIS_COUNT).map(|i| format!("${}", i + 5)).collect();
    let updates: Vec<String> = AXIS_COLUMNS
        .iter()
        .map(|col| format!("{col} = EXCLUDED.{col}"))
        .collect();
    format!(
        r#"
        INSERT INTO geo_aggregates
            (geo_level, geo_identifier, created_at, total_entities_contributing, {})
        VALUES ($1, $2, $3, $4, {})
        ON CONFLICT (geo_level, geo_identifier, created_at) DO UPDATE
        SET total_entities_contributing = EXCLUDED.total_entities_contributing, {}
        "#,
        *AXIS_COLUMN_LIST,
        placeholders.join(", "),
        updates.join(", ")
    )
});

/// Postgres-backed store. Cheap to clone.
#[derive(Clone)]
pub struct PgScoreStore {
    pool: PgPool,
}

impl PgScoreStore {
    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to database");
        Ok(Self { pool })
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GeoScoreError::Database(e.into()))?;
        Ok(())
    }
}

fn level_column(level: GeoLevel) -> Result<&'static str> {
    level
        .user_column()
        .ok_or_else(|| GeoScoreError::InvalidGeoLevel(level.to_string()))
}

#[async_trait]
impl ScoreStore for PgScoreStore {
    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let sql = format!(
            r#"
            INSERT INTO users (user_id, pincode, city, district, state, country)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            *USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user.user_id)
            .bind(&user.address.pincode)
            .bind(&user.address.city)
            .bind(&user.address.district)
            .bind(&user.address.state)
            .bind(&user.address.country)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_unique_violation() => GeoScoreError::UserExists(user.user_id),
                _ => GeoScoreError::Database(e),
            })?;

        Ok(decode_user(&row)?)
    }

    async fn apply_observation(
        &self,
        user_id: Uuid,
        observation: &PartialScores,
        now: DateTime<Utc>,
    ) -> Result<UserRecord> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM users WHERE user_id = $1 FOR UPDATE", *USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(GeoScoreError::UserNotFound(user_id))?;

        let mut user = decode_user(&row)?;
        user.record_observation(observation, now);

        let mut update = sqlx::query(UPDATE_USER_SCORES.as_str()).bind(user_id);
        for value in user.scores.values() {
            update = update.bind(*value);
        }
        update
            .bind(user.total_observations)
            .bind(user.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn user_groups_by(&self, level: GeoLevel) -> Result<Vec<UserGroupScore>> {
        let column = level_column(level)?;
        // Grouped in the database: one row per distinct value, not per user.
        let sql = format!(
            "SELECT {column} AS geo_value, COUNT(*) AS users, {} FROM users GROUP BY {column}",
            *AXIS_AVERAGES
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(UserGroupScore {
                geo_value: row.try_get::<Option<String>, _>("geo_value")?.unwrap_or_default(),
                users: row.try_get("users")?,
                scores: decode_scores(row)?,
            });
        }
        debug!(geo_level = %level, groups = out.len(), "Loaded grouped user averages");
        Ok(out)
    }

    async fn geo_pairs(&self, lower: GeoLevel) -> Result<Vec<GeoPair>> {
        let parent = lower
            .parent()
            .ok_or_else(|| GeoScoreError::InvalidGeoLevel(lower.to_string()))?;
        let lower_col = level_column(lower)?;
        let upper_col = level_column(parent)?;

        let sql = format!(
            r#"
            SELECT {lower_col} AS lower_id, {upper_col} AS upper_id, COUNT(*) AS users
            FROM users
            GROUP BY {lower_col}, {upper_col}
            "#
        );
        let rows = sqlx::query_as::<_, (Option<String>, Option<String>, i64)>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(lower, upper, users)| GeoPair {
                lower: lower.unwrap_or_default(),
                upper: upper.unwrap_or_default(),
                users,
            })
            .collect())
    }

    async fn latest_batch_at(&self, level: GeoLevel) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query_as::<_, (Option<DateTime<Utc>>,)>(
            "SELECT MAX(created_at) FROM geo_aggregates WHERE geo_level = $1",
        )
        .bind(level.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn latest_batch(&self, level: GeoLevel) -> Result<Option<AggregateBatch>> {
        // One statement so the MAX and the rows come from the same snapshot.
        let sql = format!(
            r#"
            SELECT {}
            FROM geo_aggregates
            WHERE geo_level = $1
              AND created_at = (SELECT MAX(created_at) FROM geo_aggregates WHERE geo_level = $1)
            ORDER BY geo_identifier ASC
            "#,
            *AGGREGATE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(level.as_str())
            .fetch_all(&self.pool)
            .await?;

        let rows = rows
            .iter()
            .map(|row| decode_aggregate(level, row))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(created_at) = rows.first().map(|r| r.created_at) else {
            return Ok(None);
        };
        Ok(Some(AggregateBatch {
            geo_level: level,
            created_at,
            rows,
        }))
    }

    async fn latest_for(&self, level: GeoLevel, identifier: &str) -> Result<Option<GeoAggregate>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM geo_aggregates
            WHERE geo_level = $1 AND geo_identifier = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            *AGGREGATE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(level.as_str())
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| decode_aggregate(level, &r)).transpose()?)
    }

    async fn write_batch(
        &self,
        level: GeoLevel,
        created_at: DateTime<Utc>,
        rows: &[AggregateRow],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        // Serializes same-level writers; released on commit or rollback.
        let (acquired,) = sqlx::query_as::<_, (bool,)>("SELECT pg_try_advisory_xact_lock($1, $2)")
            .bind(LEVEL_LOCK_NAMESPACE)
            .bind(level.index() as i32)
            .fetch_one(&mut *tx)
            .await?;
        if !acquired {
            return Err(GeoScoreError::LevelBusy(level));
        }

        let mut written = 0u64;
        for row in rows {
            let mut insert = sqlx::query(UPSERT_AGGREGATE.as_str())
                .bind(level.as_str())
                .bind(&row.geo_identifier)
                .bind(created_at)
                .bind(row.total_entities_contributing);
            for value in row.scores.values() {
                insert = insert.bind(*value);
            }
            written += insert.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(geo_level = %level, written, "Aggregate batch committed");
        Ok(written)
    }

    async fn prune_older_than(&self, level: GeoLevel, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM geo_aggregates WHERE geo_level = $1 AND created_at < $2")
            .bind(level.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_scores(row: &PgRow) -> std::result::Result<ScoreVector, sqlx::Error> {
    let mut values = [0.0; AXIS_COUNT];
    for (slot, column) in values.iter_mut().zip(AXIS_COLUMNS.iter()) {
        *slot = row.try_get(column.as_str())?;
    }
    Ok(ScoreVector::from_values(values))
}

fn decode_user(row: &PgRow) -> std::result::Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        user_id: row.try_get("user_id")?,
        address: GeoAddress {
            pincode: row.try_get("pincode")?,
            city: row.try_get("city")?,
            district: row.try_get("district")?,
            state: row.try_get("state")?,
            country: row.try_get("country")?,
        },
        scores: decode_scores(row)?,
        total_observations: row.try_get("total_observations")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_aggregate(level: GeoLevel, row: &PgRow) -> std::result::Result<GeoAggregate, sqlx::Error> {
    Ok(GeoAggregate {
        geo_level: level,
        geo_identifier: row.try_get("geo_identifier")?,
        created_at: row.try_get("created_at")?,
        total_entities_contributing: row.try_get("total_entities_contributing")?,
        scores: decode_scores(row)?,
    })
}
