//! Hierarchical score aggregation.
//!
//! Users' running averages are collected per pincode, then rolled up
//! pincode → city → district → state → country → global with contributor
//! counts as weights. Each level is a stateless job over a `ScoreStore`; the
//! scheduler triggers them on per-level cadences.

pub mod collector;
pub mod hierarchy;
pub mod job;
mod mean;
pub mod prune;
pub mod rollup;
pub mod scheduler;
pub mod updater;

pub use collector::{collect_level0, Collected};
pub use hierarchy::{GeoHierarchyMap, MappingConflict};
pub use job::{run_level, LevelRunReport, RunOutcome};
pub use prune::{prune_level, PruneOutcome};
pub use rollup::{propagate, reduce_global, Rollup};
pub use scheduler::{due_levels, Scheduler, TickSummary};
pub use updater::apply_observation;
