//! Running-average updates from scored items.

use chrono::{DateTime, Utc};
use tracing::debug;

use geoscore_common::{Observation, PartialScores, Result, UserRecord};
use geoscore_store::ScoreStore;

/// Validate one observation and fold it into the user's stored averages.
///
/// Client errors (unknown user, unknown axis, non-finite value, no scores)
/// and persistence errors are returned as-is so the caller can requeue.
pub async fn apply_observation(
    store: &dyn ScoreStore,
    observation: &Observation,
    now: DateTime<Utc>,
) -> Result<UserRecord> {
    let scores = PartialScores::from_map(&observation.scores)?;
    let user = store
        .apply_observation(observation.user_id, &scores, now)
        .await?;

    debug!(
        user_id = %user.user_id,
        axes = scores.scored_axes(),
        total_observations = user.total_observations,
        "User averages updated"
    );
    Ok(user)
}
