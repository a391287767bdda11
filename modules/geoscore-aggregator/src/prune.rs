//! Retention: drop snapshot rows older than the level's window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use geoscore_common::{AggregationConfig, GeoLevel};
use geoscore_store::ScoreStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneOutcome {
    pub pruned: u64,
    /// The delete failed; it is retried on the level's next run.
    pub failed: bool,
}

/// Delete rows of `level` older than `cadence × retention_multiplier`.
///
/// Only call after a successful write for `level`. Failures are logged, not
/// returned: they must not undo the write that preceded them.
pub async fn prune_level(
    store: &dyn ScoreStore,
    config: &AggregationConfig,
    level: GeoLevel,
    now: DateTime<Utc>,
) -> PruneOutcome {
    let cutoff = now - config.retention_window(level);

    match store.prune_older_than(level, cutoff).await {
        Ok(pruned) => {
            if pruned > 0 {
                info!(geo_level = %level, pruned, cutoff = %cutoff, "Pruned expired snapshots");
            }
            PruneOutcome {
                pruned,
                failed: false,
            }
        }
        Err(e) => {
            warn!(geo_level = %level, error = %e, "Failed to prune expired snapshots, retrying next run");
            PruneOutcome {
                pruned: 0,
                failed: true,
            }
        }
    }
}
