//! The fixed personality axes and the score vector built on them.
//!
//! The axis list is compiled in. Every score-holding row (user, geo aggregate)
//! carries exactly one `avg_<axis>` column per entry, in this order, and the
//! SQL column lists are derived from it. Nothing here is read from runtime
//! configuration; `Config` only checks that a configured list matches.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{GeoScoreError, Result};

/// Number of axes in a [`ScoreVector`].
pub const AXIS_COUNT: usize = 58;

/// Neutral value every axis starts at.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Axis names, in storage order.
pub const AXES: [&str; AXIS_COUNT] = [
    "intellectual_honesty",
    "courage",
    "nobility",
    "self_respect",
    "empathy",
    "aggression",
    "resentment",
    "idealism",
    "cynicism",
    "loneliness",
    "creativity",
    "frustration",
    "conformity_pressure",
    "tribal_affiliation",
    "curiosity",
    "innovation_optimism",
    "self_worth",
    "willingness_conspiracy_theories",
    "emotional_state_anxiety",
    "emotional_state_sadness",
    "emotional_state_anger",
    "attachment_needs",
    "self_loathing",
    "pride",
    "relationship_satisfaction",
    "desire_for_connection",
    "ambition_motivation",
    "gratitude",
    "entitlement",
    "fear_of_judgment",
    "confidence_in_future_self",
    "shame",
    "guilt",
    "trust_in_institutions",
    "perception_of_justice",
    "moral_alignment_with_society",
    "dissatisfaction_with_culture_media",
    "concern_over_decline_collapse",
    "political_engagement_level",
    "faith_in_democracy",
    "sense_of_alienation",
    "systemic_paranoia",
    "preference_for_strong_leadership_vs_consensus",
    "libertarianism_vs_collectivism",
    "tolerance_for_authority",
    "openness_to_change_reform",
    "compliance_sentiment",
    "views_on_taxation",
    "polarization_intensity",
    "willingness_to_protest_or_comply",
    "brand_loyalty",
    "frustration_with_products",
    "openness_to_alternatives",
    "cost_sensitivity",
    "trust_in_advertising",
    "expectations_from_businesses",
    "belief_in_capitalism",
    "personal_financial_satisfaction",
];

/// Position of `axis` in [`AXES`].
pub fn axis_index(axis: &str) -> Option<usize> {
    AXES.iter().position(|a| *a == axis)
}

/// Storage column for the axis at `index`, e.g. `avg_courage`.
pub fn axis_column(index: usize) -> String {
    format!("avg_{}", AXES[index])
}

/// One value per axis. Never partially populated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreVector([f64; AXIS_COUNT]);

impl ScoreVector {
    /// Every axis at [`NEUTRAL_SCORE`]. The state of a freshly registered user.
    pub fn neutral() -> Self {
        Self([NEUTRAL_SCORE; AXIS_COUNT])
    }

    /// Every axis set to `value`.
    pub fn splat(value: f64) -> Self {
        Self([value; AXIS_COUNT])
    }

    pub fn from_values(values: [f64; AXIS_COUNT]) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64; AXIS_COUNT] {
        &self.0
    }

    /// Value of a named axis, or `None` for an unknown name.
    pub fn get(&self, axis: &str) -> Option<f64> {
        axis_index(axis).map(|i| self.0[i])
    }

    /// Set a named axis.
    pub fn set(&mut self, axis: &str, value: f64) -> Result<()> {
        let i = axis_index(axis).ok_or_else(|| GeoScoreError::UnknownAxis(axis.to_string()))?;
        self.0[i] = value;
        Ok(())
    }

    /// Builder form of [`ScoreVector::set`].
    pub fn with(mut self, axis: &str, value: f64) -> Result<Self> {
        self.set(axis, value)?;
        Ok(self)
    }

    /// Fold one observation into a running mean over `prior_count` observations.
    ///
    /// `new_avg = (old_avg * prior_count + value) / (prior_count + 1)` for every
    /// axis the observation supplies. Absent axes keep their current average.
    pub fn fold_observation(&mut self, prior_count: i64, observation: &PartialScores) {
        let prior = prior_count.max(0) as f64;
        for (avg, value) in self.0.iter_mut().zip(observation.0.iter()) {
            if let Some(v) = value {
                *avg = (*avg * prior + v) / (prior + 1.0);
            }
        }
    }
}

impl Default for ScoreVector {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Serializes as `{ "<axis>": value, ... }` in axis order.
impl Serialize for ScoreVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(AXIS_COUNT))?;
        for (axis, value) in AXES.iter().zip(self.0.iter()) {
            map.serialize_entry(axis, value)?;
        }
        map.end()
    }
}

/// A validated observation: some axes scored, the rest absent.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialScores([Option<f64>; AXIS_COUNT]);

impl PartialScores {
    /// Validate a raw `axis -> value` map from the scoring service.
    ///
    /// Rejects unknown axis names, non-finite values and empty maps.
    pub fn from_map(scores: &BTreeMap<String, f64>) -> Result<Self> {
        if scores.is_empty() {
            return Err(GeoScoreError::EmptyObservation);
        }
        let mut values = [None; AXIS_COUNT];
        for (axis, &value) in scores {
            let i = axis_index(axis).ok_or_else(|| GeoScoreError::UnknownAxis(axis.clone()))?;
            if !value.is_finite() {
                return Err(GeoScoreError::InvalidScore {
                    axis: axis.clone(),
                    value,
                });
            }
            values[i] = Some(value);
        }
        Ok(Self(values))
    }

    /// An observation that scores every axis.
    pub fn full(vector: &ScoreVector) -> Self {
        let mut values = [None; AXIS_COUNT];
        for (slot, v) in values.iter_mut().zip(vector.values()) {
            *slot = Some(*v);
        }
        Self(values)
    }

    pub fn get(&self, axis: &str) -> Option<f64> {
        axis_index(axis).and_then(|i| self.0[i])
    }

    /// Number of axes this observation scores.
    pub fn scored_axes(&self) -> usize {
        self.0.iter().filter(|v| v.is_some()).count()
    }
}
