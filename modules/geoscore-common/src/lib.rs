pub mod axes;
pub mod config;
pub mod error;
pub mod types;

pub use axes::*;
pub use config::{AggregationConfig, Config};
pub use error::{GeoScoreError, Result};
pub use types::*;
