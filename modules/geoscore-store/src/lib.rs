//! Persistence for user score averages and geo aggregate snapshots.
//!
//! `ScoreStore` is the seam the aggregation jobs run against. `PgScoreStore`
//! is the production Postgres implementation; `MemoryScoreStore` keeps the
//! same semantics in process for tests.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemoryScoreStore;
pub use postgres::{PgScoreStore, LEVEL_LOCK_NAMESPACE};
pub use traits::ScoreStore;
