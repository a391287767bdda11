use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::axes::{PartialScores, ScoreVector};
use crate::error::{GeoScoreError, Result};

// --- Geo Levels ---

/// One rung of the geographic hierarchy, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoLevel {
    Pincode,
    City,
    District,
    State,
    Country,
    Global,
}

impl GeoLevel {
    /// Every level in dependency order.
    pub const ALL: [GeoLevel; 6] = [
        GeoLevel::Pincode,
        GeoLevel::City,
        GeoLevel::District,
        GeoLevel::State,
        GeoLevel::Country,
        GeoLevel::Global,
    ];

    /// Identifier of the single global row.
    pub const GLOBAL_IDENTIFIER: &'static str = "global";

    pub fn as_str(&self) -> &'static str {
        match self {
            GeoLevel::Pincode => "pincode",
            GeoLevel::City => "city",
            GeoLevel::District => "district",
            GeoLevel::State => "state",
            GeoLevel::Country => "country",
            GeoLevel::Global => "global",
        }
    }

    /// Position in [`GeoLevel::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The level this one is rolled up from. `None` for the user-fed level.
    pub fn child(&self) -> Option<GeoLevel> {
        match self {
            GeoLevel::Pincode => None,
            GeoLevel::City => Some(GeoLevel::Pincode),
            GeoLevel::District => Some(GeoLevel::City),
            GeoLevel::State => Some(GeoLevel::District),
            GeoLevel::Country => Some(GeoLevel::State),
            GeoLevel::Global => Some(GeoLevel::Country),
        }
    }

    pub fn parent(&self) -> Option<GeoLevel> {
        match self {
            GeoLevel::Pincode => Some(GeoLevel::City),
            GeoLevel::City => Some(GeoLevel::District),
            GeoLevel::District => Some(GeoLevel::State),
            GeoLevel::State => Some(GeoLevel::Country),
            GeoLevel::Country => Some(GeoLevel::Global),
            GeoLevel::Global => None,
        }
    }

    /// Column on `users` holding this level's identifier. `None` for global.
    pub fn user_column(&self) -> Option<&'static str> {
        match self {
            GeoLevel::Pincode => Some("pincode"),
            GeoLevel::City => Some("city"),
            GeoLevel::District => Some("district"),
            GeoLevel::State => Some("state"),
            GeoLevel::Country => Some("country"),
            GeoLevel::Global => None,
        }
    }
}

impl std::fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeoLevel {
    type Err = GeoScoreError;

    fn from_str(s: &str) -> Result<Self> {
        GeoLevel::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GeoScoreError::InvalidGeoLevel(s.to_string()))
    }
}

// --- Users ---

/// A user's fixed address. Used only as grouping keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoAddress {
    pub pincode: String,
    pub city: String,
    pub district: String,
    pub state: String,
    pub country: String,
}

impl GeoAddress {
    /// Raw attribute for `level`. `None` for global.
    pub fn get(&self, level: GeoLevel) -> Option<&str> {
        match level {
            GeoLevel::Pincode => Some(&self.pincode),
            GeoLevel::City => Some(&self.city),
            GeoLevel::District => Some(&self.district),
            GeoLevel::State => Some(&self.state),
            GeoLevel::Country => Some(&self.country),
            GeoLevel::Global => None,
        }
    }
}

/// Normalize a geo attribute into a grouping key. Blank values are missing.
pub fn geo_key(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Registration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub user_id: Uuid,
    pub address: GeoAddress,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub address: GeoAddress,
    pub scores: ScoreVector,
    pub total_observations: i64,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// A freshly registered user: neutral scores, no observations.
    pub fn registered(user: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user.user_id,
            address: user.address,
            scores: ScoreVector::neutral(),
            total_observations: 0,
            updated_at: now,
        }
    }

    /// Fold one observation into the running averages.
    pub fn record_observation(&mut self, observation: &PartialScores, now: DateTime<Utc>) {
        self.scores
            .fold_observation(self.total_observations, observation);
        self.total_observations += 1;
        self.updated_at = now;
    }
}

/// One scored item for one user, as the scoring worker hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub user_id: Uuid,
    pub scores: BTreeMap<String, f64>,
}

/// Users sharing one raw attribute value at a level, with the plain mean of
/// their current averages.
#[derive(Debug, Clone)]
pub struct UserGroupScore {
    pub geo_value: String,
    pub users: i64,
    pub scores: ScoreVector,
}

/// A distinct `(lower, upper)` identifier pair observed among users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoPair {
    pub lower: String,
    pub upper: String,
    /// Users carrying this exact pair.
    pub users: i64,
}

// --- Aggregates ---

/// A computed aggregate, before it is stamped and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub geo_identifier: String,
    pub total_entities_contributing: i64,
    pub scores: ScoreVector,
}

/// A persisted aggregate snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoAggregate {
    pub geo_level: GeoLevel,
    pub geo_identifier: String,
    pub created_at: DateTime<Utc>,
    pub total_entities_contributing: i64,
    pub scores: ScoreVector,
}

/// All rows of one level written by a single run.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateBatch {
    pub geo_level: GeoLevel,
    pub created_at: DateTime<Utc>,
    pub rows: Vec<GeoAggregate>,
}
