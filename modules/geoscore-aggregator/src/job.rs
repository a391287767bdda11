//! One aggregation run for one level: compute, write the batch, then prune.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::{debug, info};

use geoscore_common::{AggregateRow, AggregationConfig, GeoLevel, Result};
use geoscore_store::ScoreStore;

use crate::collector::collect_level0;
use crate::hierarchy::GeoHierarchyMap;
use crate::prune::{prune_level, PruneOutcome};
use crate::rollup::{propagate, reduce_global};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// A batch was written and the level pruned.
    Written,
    /// Input existed but produced no rows (no users, nothing mapped).
    NoRows,
    /// The child level has never produced a batch.
    NoChildBatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelRunReport {
    pub geo_level: GeoLevel,
    pub created_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub rows_written: u64,
    /// Users or child rows left out for missing geography or no contributors.
    pub skipped_inputs: usize,
    /// Children observed under more than one parent.
    pub mapping_conflicts: usize,
    pub prune: PruneOutcome,
}

impl fmt::Display for LevelRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run: {:?}, {} rows written, {} inputs skipped, {} mapping conflicts, {} rows pruned{}",
            self.geo_level,
            self.outcome,
            self.rows_written,
            self.skipped_inputs,
            self.mapping_conflicts,
            self.prune.pruned,
            if self.prune.failed { " (prune failed)" } else { "" }
        )
    }
}

struct Computed {
    rows: Vec<AggregateRow>,
    skipped: usize,
    conflicts: usize,
}

/// Run the aggregation for `level` at `now`.
///
/// Errors only for persistence failures before or during the batch write, in
/// which case nothing was written. Pruning failures are reported, not raised.
pub async fn run_level(
    store: &dyn ScoreStore,
    config: &AggregationConfig,
    level: GeoLevel,
    now: DateTime<Utc>,
) -> Result<LevelRunReport> {
    // Postgres keeps microseconds; stamp the batch at the precision it reads back.
    let created_at = now.trunc_subsecs(6);

    let mut report = LevelRunReport {
        geo_level: level,
        created_at,
        outcome: RunOutcome::NoRows,
        rows_written: 0,
        skipped_inputs: 0,
        mapping_conflicts: 0,
        prune: PruneOutcome::default(),
    };

    let Some(computed) = compute(store, level).await? else {
        info!(geo_level = %level, "No child batch yet, nothing to roll up");
        report.outcome = RunOutcome::NoChildBatch;
        return Ok(report);
    };
    report.skipped_inputs = computed.skipped;
    report.mapping_conflicts = computed.conflicts;

    if computed.rows.is_empty() {
        info!(geo_level = %level, skipped = computed.skipped, "Aggregation produced no rows");
        return Ok(report);
    }

    report.rows_written = store.write_batch(level, created_at, &computed.rows).await?;
    report.outcome = RunOutcome::Written;
    report.prune = prune_level(store, config, level, created_at).await;

    info!(
        geo_level = %level,
        rows = report.rows_written,
        skipped = report.skipped_inputs,
        conflicts = report.mapping_conflicts,
        pruned = report.prune.pruned,
        "Aggregation complete"
    );
    Ok(report)
}

/// `None` when the level reads from a child level with no batch.
async fn compute(store: &dyn ScoreStore, level: GeoLevel) -> Result<Option<Computed>> {
    let Some(child) = level.child() else {
        let users = store.user_groups_by(level).await?;
        let collected = collect_level0(&users);
        return Ok(Some(Computed {
            rows: collected.rows,
            skipped: collected.skipped,
            conflicts: 0,
        }));
    };

    let Some(batch) = store.latest_batch(child).await? else {
        return Ok(None);
    };

    if level == GeoLevel::Global {
        let rollup = reduce_global(&batch.rows);
        return Ok(Some(Computed {
            skipped: rollup.skipped(),
            rows: rollup.rows,
            conflicts: 0,
        }));
    }

    let pairs = store.geo_pairs(child).await?;
    let map = GeoHierarchyMap::from_pairs(child, &pairs);
    if map.skipped_pairs() > 0 {
        debug!(geo_level = %child, pairs = map.skipped_pairs(), "Ignored address pairs with a blank identifier");
    }
    let rollup = propagate(&batch.rows, &map);
    Ok(Some(Computed {
        skipped: rollup.skipped(),
        rows: rollup.rows,
        conflicts: map.conflicts().len(),
    }))
}
