use thiserror::Error;
use uuid::Uuid;

use crate::types::GeoLevel;

pub type Result<T> = std::result::Result<T, GeoScoreError>;

#[derive(Error, Debug)]
pub enum GeoScoreError {
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("User already registered: {0}")]
    UserExists(Uuid),

    #[error("Unknown axis: {0}")]
    UnknownAxis(String),

    #[error("Invalid score for axis {axis}: {value}")]
    InvalidScore { axis: String, value: f64 },

    #[error("Observation carries no scores")]
    EmptyObservation,

    #[error("Unknown geo level: {0}")]
    InvalidGeoLevel(String),

    #[error("Aggregation lock conflict: another {0} run is writing")]
    LevelBusy(GeoLevel),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GeoScoreError {
    /// Errors caused by the caller's input rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GeoScoreError::UserNotFound(_)
                | GeoScoreError::UserExists(_)
                | GeoScoreError::UnknownAxis(_)
                | GeoScoreError::InvalidScore { .. }
                | GeoScoreError::EmptyObservation
                | GeoScoreError::InvalidGeoLevel(_)
        )
    }
}
