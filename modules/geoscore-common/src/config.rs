use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::info;

use crate::axes::AXES;
use crate::error::{GeoScoreError, Result};
use crate::types::GeoLevel;

/// Cadence and retention settings for the aggregation jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConfig {
    /// Hours between runs, indexed by [`GeoLevel::index`].
    cadence_hours: [u32; 6],
    /// Rows older than `cadence × retention_multiplier` are pruned.
    pub retention_multiplier: u32,
    /// How often the scheduler wakes up to look for due levels.
    pub tick: StdDuration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cadence_hours: [2, 4, 6, 24, 24, 24],
            retention_multiplier: 2,
            tick: StdDuration::from_secs(60),
        }
    }
}

impl AggregationConfig {
    pub fn cadence_hours(&self, level: GeoLevel) -> u32 {
        self.cadence_hours[level.index()]
    }

    pub fn cadence(&self, level: GeoLevel) -> Duration {
        Duration::hours(self.cadence_hours(level) as i64)
    }

    /// Maximum age of a persisted row of `level`.
    pub fn retention_window(&self, level: GeoLevel) -> Duration {
        Duration::hours(self.cadence_hours(level) as i64 * self.retention_multiplier as i64)
    }

    pub fn with_cadence_hours(mut self, level: GeoLevel, hours: u32) -> Self {
        self.cadence_hours[level.index()] = hours;
        self
    }

    fn validate(&self) -> Result<()> {
        for level in GeoLevel::ALL {
            if self.cadence_hours(level) == 0 {
                return Err(GeoScoreError::Config(format!(
                    "cadence for {level} must be at least one hour"
                )));
            }
        }
        if self.retention_multiplier == 0 {
            return Err(GeoScoreError::Config(
                "AGG_RETENTION_MULTIPLIER must be at least 1".to_string(),
            ));
        }
        if self.tick.is_zero() {
            return Err(GeoScoreError::Config(
                "AGG_TICK_SECONDS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub aggregation: AggregationConfig,
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = AggregationConfig::default();
        let mut cadence_hours = [0u32; 6];
        for level in GeoLevel::ALL {
            let key = format!("AGG_{}_FREQ_HOURS", level.as_str().to_ascii_uppercase());
            cadence_hours[level.index()] = parse_env(&key, defaults.cadence_hours(level))?;
        }

        let aggregation = AggregationConfig {
            cadence_hours,
            retention_multiplier: parse_env("AGG_RETENTION_MULTIPLIER", defaults.retention_multiplier)?,
            tick: StdDuration::from_secs(parse_env("AGG_TICK_SECONDS", defaults.tick.as_secs())?),
        };
        aggregation.validate()?;

        if let Ok(axes) = env::var("GEOSCORE_AXES") {
            check_axis_list(&axes)?;
        }

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5)?,
            aggregation,
        })
    }

    /// Log the effective configuration without credentials.
    pub fn log_redacted(&self) {
        info!(
            database = %redact_url(&self.database_url),
            max_connections = self.max_connections,
            pincode_hours = self.aggregation.cadence_hours(GeoLevel::Pincode),
            city_hours = self.aggregation.cadence_hours(GeoLevel::City),
            district_hours = self.aggregation.cadence_hours(GeoLevel::District),
            state_hours = self.aggregation.cadence_hours(GeoLevel::State),
            country_hours = self.aggregation.cadence_hours(GeoLevel::Country),
            global_hours = self.aggregation.cadence_hours(GeoLevel::Global),
            retention_multiplier = self.aggregation.retention_multiplier,
            "Configuration loaded"
        );
    }
}

/// A configured axis list must match the compiled one exactly, in order.
pub fn check_axis_list(configured: &str) -> Result<()> {
    let names: Vec<&str> = configured
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if names != AXES {
        return Err(GeoScoreError::Config(format!(
            "GEOSCORE_AXES does not match the compiled axis list ({} configured, {} compiled)",
            names.len(),
            AXES.len()
        )));
    }
    Ok(())
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| GeoScoreError::Config(format!("{key} environment variable is required")))
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GeoScoreError::Config(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let creds = &url[scheme + 3..at];
            let user = creds.split(':').next().unwrap_or_default();
            format!("{}{}:***{}", &url[..scheme + 3], user, &url[at..])
        }
        _ => url.to_string(),
    }
}
