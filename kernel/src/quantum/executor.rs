//! Approach execution interface.
//!
//! The orchestrator delegates the actual work of an approach to an
//! [`ApproachExecutor`]. Executors report progress through a shared
//! [`ProgressHandle`] that the progress monitor reads without locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::types::{ApproachId, QualityMetrics, QuantumBranchId};

/// Parameter that makes [`SimulatedExecutor`] fail the approach.
pub const SIMULATE_FAILURE_PARAM: &str = "simulate_failure";

/// Completion percentage shared between an executor and the progress monitor.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle(Arc<AtomicU8>);

impl ProgressHandle {
    /// Creates a handle at 0%.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the completion percentage, saturating at 100.
    pub fn set(&self, percent: u8) {
        self.0.store(percent.min(100), Ordering::SeqCst);
    }

    /// Current completion percentage.
    #[must_use]
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything an executor needs to run one approach.
#[derive(Debug, Clone)]
pub struct ApproachContext {
    /// Parent quantum branch.
    pub quantum_branch_id: QuantumBranchId,
    /// Goal of the parent.
    pub goal: String,
    /// Approach being run.
    pub approach_id: ApproachId,
    /// Approach name.
    pub name: String,
    /// Strategy label.
    pub strategy: String,
    /// Dedicated Git branch.
    pub branch_id: String,
    /// Executor parameters.
    pub parameters: HashMap<String, String>,
    /// Progress reporting.
    pub progress: ProgressHandle,
    /// Cancelled when the execution is aborted.
    pub cancel: CancellationToken,
}

/// Successful approach output.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproachOutcome {
    /// Measured quality.
    pub metrics: QualityMetrics,
    /// Short human-readable summary.
    pub summary: String,
}

/// Reasons an approach did not produce an outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApproachError {
    /// The executor reported a failure.
    #[error("approach failed: {0}")]
    Failed(String),
    /// The approach exceeded its time budget.
    #[error("approach timed out after {0:?}")]
    TimedOut(Duration),
    /// The executor panicked.
    #[error("approach executor panicked")]
    Panicked,
    /// The execution was cancelled.
    #[error("approach cancelled")]
    Cancelled,
}

/// Runs one approach.
#[async_trait]
pub trait ApproachExecutor: Send + Sync {
    /// Executes the approach described by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApproachError`] if the approach cannot be completed.
    async fn execute(&self, ctx: ApproachContext) -> Result<ApproachOutcome, ApproachError>;
}

/// Deterministic executor that derives metrics from the approach strategy.
///
/// Work is simulated as a fixed number of sleeps, updating progress after
/// each one and honouring cancellation between steps.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedExecutor {
    step: Duration,
    steps: u8,
}

impl SimulatedExecutor {
    /// Creates an executor that works for `steps` sleeps of `step` each.
    #[must_use]
    pub fn new(step: Duration, steps: u8) -> Self {
        Self {
            step,
            steps: steps.max(1),
        }
    }

    /// Metrics derived from `name` and `strategy`.
    #[must_use]
    pub fn metrics_for(name: &str, strategy: &str) -> QualityMetrics {
        let mut hasher = Sha256::new();
        hasher.update(strategy.as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let scale = |b: u8| 40.0 + f64::from(b % 60);
        QualityMetrics {
            performance: scale(digest[0]),
            maintainability: scale(digest[1]),
            test_coverage: scale(digest[2]),
            complexity: f64::from(digest[3] % 50),
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(25), 4)
    }
}

#[async_trait]
impl ApproachExecutor for SimulatedExecutor {
    async fn execute(&self, ctx: ApproachContext) -> Result<ApproachOutcome, ApproachError> {
        for step in 1..=self.steps {
            tokio::select! {
                () = ctx.cancel.cancelled() => return Err(ApproachError::Cancelled),
                () = tokio::time::sleep(self.step) => {}
            }
            let percent = u16::from(step) * 100 / u16::from(self.steps);
            ctx.progress.set(u8::try_from(percent).unwrap_or(100));
        }

        if ctx
            .parameters
            .get(SIMULATE_FAILURE_PARAM)
            .is_some_and(|v| v == "true")
        {
            return Err(ApproachError::Failed(format!(
                "strategy '{}' did not converge",
                ctx.strategy
            )));
        }

        Ok(ApproachOutcome {
            metrics: Self::metrics_for(&ctx.name, &ctx.strategy),
            summary: format!("{} applied '{}' on {}", ctx.name, ctx.strategy, ctx.branch_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(parameters: HashMap<String, String>) -> ApproachContext {
        ApproachContext {
            quantum_branch_id: QuantumBranchId::new(),
            goal: "faster build".into(),
            approach_id: ApproachId::new(),
            name: "cache".into(),
            strategy: "memoize".into(),
            branch_id: "quantum/build/cache".into(),
            parameters,
            progress: ProgressHandle::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn progress_saturates() {
        let progress = ProgressHandle::new();
        progress.set(250);
        assert_eq!(progress.get(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_executor_reports_progress_and_metrics() -> Result<(), ApproachError> {
        let ctx = context(HashMap::new());
        let progress = ctx.progress.clone();
        let outcome = SimulatedExecutor::default().execute(ctx).await?;

        assert_eq!(progress.get(), 100);
        assert_eq!(outcome.metrics, SimulatedExecutor::metrics_for("cache", "memoize"));
        assert!((40.0..100.0).contains(&outcome.metrics.performance));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_executor_can_fail_and_be_cancelled() {
        let failing = context(HashMap::from([(SIMULATE_FAILURE_PARAM.to_string(), "true".to_string())]));
        assert!(matches!(
            SimulatedExecutor::default().execute(failing).await,
            Err(ApproachError::Failed(_))
        ));

        let cancelled = context(HashMap::new());
        cancelled.cancel.cancel();
        assert_eq!(
            SimulatedExecutor::default().execute(cancelled).await,
            Err(ApproachError::Cancelled)
        );
    }
}
