//! Approach scoring.

use super::types::ApproachResult;

/// Highest possible score.
pub const MAX_SCORE: f64 = 100.0;

/// Turns one approach result into a score in `[0, 100]`.
pub trait Scorer: Send + Sync {
    /// Scores `result`. Implementations must return a finite value; the
    /// orchestrator clamps it to `[0, 100]`.
    fn score(&self, result: &ApproachResult) -> f64;
}

/// Weighted quality score with complexity and time penalties.
///
/// `performance * wp + maintainability * wm + test_coverage * wc
///  - complexity * complexity_weight - min(secs * time_weight, max_time_penalty)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedScorer {
    /// Weight of the performance metric.
    pub performance_weight: f64,
    /// Weight of the maintainability metric.
    pub maintainability_weight: f64,
    /// Weight of the coverage metric.
    pub coverage_weight: f64,
    /// Penalty per complexity point.
    pub complexity_weight: f64,
    /// Penalty per second of execution time.
    pub time_weight: f64,
    /// Cap on the time penalty.
    pub max_time_penalty: f64,
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self {
            performance_weight: 0.4,
            maintainability_weight: 0.3,
            coverage_weight: 0.3,
            complexity_weight: 0.2,
            time_weight: 0.1,
            max_time_penalty: 20.0,
        }
    }
}

impl Scorer for WeightedScorer {
    fn score(&self, result: &ApproachResult) -> f64 {
        let m = &result.metrics;
        let weighted = m.performance * self.performance_weight
            + m.maintainability * self.maintainability_weight
            + m.test_coverage * self.coverage_weight;
        let complexity_penalty = m.complexity * self.complexity_weight;
        let time_penalty =
            (result.execution_time.as_secs_f64() * self.time_weight).min(self.max_time_penalty);
        clamp_score(weighted - complexity_penalty - time_penalty)
    }
}

/// Clamps `raw` to `[0, 100]`, mapping NaN to zero.
#[must_use]
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, MAX_SCORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantum::types::{ApproachId, QualityMetrics};
    use std::time::Duration;

    fn result(metrics: QualityMetrics, secs: u64) -> ApproachResult {
        ApproachResult {
            approach_id: ApproachId::new(),
            approach_name: "a".into(),
            ordinal: 0,
            success: true,
            error: None,
            execution_time: Duration::from_secs(secs),
            metrics,
        }
    }

    #[test]
    fn weighted_score_applies_penalties() {
        let metrics = QualityMetrics {
            performance: 90.0,
            maintainability: 80.0,
            test_coverage: 70.0,
            complexity: 50.0,
        };
        // 36 + 24 + 21 - 10 - 1
        let score = WeightedScorer::default().score(&result(metrics, 10));
        assert!((score - 70.0).abs() < 1e-9);
    }

    #[test]
    fn time_penalty_is_capped_and_score_clamped() {
        let metrics = QualityMetrics {
            performance: 10.0,
            maintainability: 10.0,
            test_coverage: 10.0,
            complexity: 100.0,
        };
        assert!(WeightedScorer::default().score(&result(metrics, 10_000)).abs() < f64::EPSILON);

        let perfect = QualityMetrics {
            performance: 100.0,
            maintainability: 100.0,
            test_coverage: 100.0,
            complexity: 0.0,
        };
        let score = WeightedScorer::default().score(&result(perfect, 0));
        assert!((score - MAX_SCORE).abs() < 1e-9);
    }

    #[test]
    fn clamp_handles_nan() {
        assert!(clamp_score(f64::NAN).abs() < f64::EPSILON);
        assert!((clamp_score(150.0) - MAX_SCORE).abs() < f64::EPSILON);
    }
}
