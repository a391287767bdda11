use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use geoscore_common::{AggregationConfig, GeoLevel, Result};
use geoscore_store::ScoreStore;

use crate::job::{run_level, LevelRunReport, RunOutcome};

/// Levels whose cadence has elapsed since their last run, in dependency order.
pub fn due_levels(
    config: &AggregationConfig,
    last_runs: &HashMap<GeoLevel, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<GeoLevel> {
    GeoLevel::ALL
        .into_iter()
        .filter(|level| match last_runs.get(level) {
            Some(last) => now - *last >= config.cadence(*level),
            None => true,
        })
        .collect()
}

/// What one scheduler tick did.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub ran: Vec<LevelRunReport>,
    pub failed: Vec<GeoLevel>,
    /// Due, but held back because the child level has no batch yet.
    pub deferred: Vec<GeoLevel>,
}

/// Triggers each level's job on its own cadence.
///
/// Levels run one at a time in dependency order, so within a tick a parent
/// always sees the batch its child just wrote.
pub struct Scheduler {
    store: Arc<dyn ScoreStore>,
    config: AggregationConfig,
    last_runs: HashMap<GeoLevel, DateTime<Utc>>,
    has_batch: HashSet<GeoLevel>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ScoreStore>, config: AggregationConfig) -> Self {
        Self {
            store,
            config,
            last_runs: HashMap::new(),
            has_batch: HashSet::new(),
        }
    }

    /// Seed last-run times from the newest stored batch of each level.
    pub async fn seed_from_store(&mut self) -> Result<()> {
        for level in GeoLevel::ALL {
            if let Some(at) = self.store.latest_batch_at(level).await? {
                debug!(geo_level = %level, last_batch = %at, "Seeded last run");
                self.last_runs.insert(level, at);
                self.has_batch.insert(level);
            }
        }
        Ok(())
    }

    pub fn last_run(&self, level: GeoLevel) -> Option<DateTime<Utc>> {
        self.last_runs.get(&level).copied()
    }

    /// Run every due level once.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        for level in due_levels(&self.config, &self.last_runs, now) {
            if let Some(child) = level.child() {
                if !self.has_batch.contains(&child) {
                    debug!(geo_level = %level, child = %child, "Deferring, child level has no batch yet");
                    summary.deferred.push(level);
                    continue;
                }
            }

            // Failed runs wait a full cadence before the retry.
            self.last_runs.insert(level, now);

            match run_level(self.store.as_ref(), &self.config, level, now).await {
                Ok(report) => {
                    if report.outcome == RunOutcome::Written {
                        self.has_batch.insert(level);
                    }
                    info!("{report}");
                    summary.ran.push(report);
                }
                Err(e) => {
                    error!(geo_level = %level, error = %e, "Aggregation run failed, retrying next cadence");
                    summary.failed.push(level);
                }
            }
        }

        summary
    }

    /// Tick on the configured interval until `shutdown` resolves.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(tick_secs = self.config.tick.as_secs(), "Scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let summary = self.tick(Utc::now()).await;
                    if !summary.ran.is_empty() || !summary.failed.is_empty() {
                        info!(
                            ran = summary.ran.len(),
                            failed = summary.failed.len(),
                            deferred = summary.deferred.len(),
                            "Scheduler tick complete"
                        );
                    }
                }
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }
}
