use geoscore_common::{ScoreVector, AXIS_COUNT};

/// Running per-axis weighted sum. Weight 1 per item gives the plain mean.
#[derive(Debug, Clone)]
pub(crate) struct WeightedMean {
    sums: [f64; AXIS_COUNT],
    weight: i64,
}

impl WeightedMean {
    pub(crate) fn new() -> Self {
        Self {
            sums: [0.0; AXIS_COUNT],
            weight: 0,
        }
    }

    pub(crate) fn add(&mut self, scores: &ScoreVector, weight: i64) {
        let w = weight as f64;
        for (sum, value) in self.sums.iter_mut().zip(scores.values()) {
            *sum += value * w;
        }
        self.weight += weight;
    }

    pub(crate) fn weight(&self) -> i64 {
        self.weight
    }

    /// `None` when nothing was added.
    pub(crate) fn finish(&self) -> Option<ScoreVector> {
        if self.weight < 1 {
            return None;
        }
        let total = self.weight as f64;
        let mut values = self.sums;
        for v in values.iter_mut() {
            *v /= total;
        }
        Some(ScoreVector::from_values(values))
    }
}
