//! Quantum branch domain types.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new identifier with a random UUID.
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// First eight hex digits, used in branch names.
            #[must_use]
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a quantum branch.
    QuantumBranchId
);
uuid_id!(
    /// Unique identifier for an approach.
    ApproachId
);

/// Lifecycle status of a quantum branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantumStatus {
    /// Created, approaches not yet executed.
    Active,
    /// Every approach has reported a result.
    Executed,
    /// An optimal approach has been selected.
    Optimized,
}

impl fmt::Display for QuantumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Executed => write!(f, "executed"),
            Self::Optimized => write!(f, "optimized"),
        }
    }
}

/// Lifecycle status of one approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproachStatus {
    /// Waiting to run.
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error, timed out or panicked.
    Failed,
}

/// Caller-supplied description of one approach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachConfig {
    /// Unique name within the quantum branch.
    pub name: String,
    /// Strategy label handed to the executor.
    pub strategy: String,
    /// Free-form executor parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl ApproachConfig {
    /// Creates a config without parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: strategy.into(),
            parameters: HashMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// One candidate strategy within a quantum branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approach {
    /// Approach identifier.
    pub id: ApproachId,
    /// Name, unique within the parent.
    pub name: String,
    /// Strategy label.
    pub strategy: String,
    /// Dedicated Git branch.
    pub branch_id: String,
    /// Current status.
    pub status: ApproachStatus,
    /// Score assigned at selection time, in `[0, 100]`.
    pub score: f64,
    /// Normalized score assigned at selection time, in `[0, 1]`.
    pub confidence: f64,
    /// Executor parameters.
    pub parameters: HashMap<String, String>,
}

/// A group of approaches explored for the same goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumBranch {
    /// Quantum branch identifier.
    pub id: QuantumBranchId,
    /// Name.
    pub name: String,
    /// Goal the approaches try to reach.
    pub goal: String,
    /// Current status.
    pub status: QuantumStatus,
    /// Approaches in declaration order.
    pub approaches: Vec<Approach>,
    /// Winner, once selected.
    pub optimal_approach_id: Option<ApproachId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl QuantumBranch {
    /// Looks up an approach by id.
    #[must_use]
    pub fn approach(&self, id: ApproachId) -> Option<&Approach> {
        self.approaches.iter().find(|a| a.id == id)
    }
}

/// Quality measurements reported by an executor. Each value is in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Runtime performance.
    pub performance: f64,
    /// Ease of maintenance.
    pub maintainability: f64,
    /// Test coverage.
    pub test_coverage: f64,
    /// Complexity; higher is worse.
    pub complexity: f64,
}

impl QualityMetrics {
    /// Component-wise mean. Returns the default for an empty input.
    #[must_use]
    pub fn average<'a, I>(metrics: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut sum = Self::default();
        let mut n = 0u32;
        for m in metrics {
            sum.performance += m.performance;
            sum.maintainability += m.maintainability;
            sum.test_coverage += m.test_coverage;
            sum.complexity += m.complexity;
            n += 1;
        }
        if n == 0 {
            return sum;
        }
        let n = f64::from(n);
        Self {
            performance: sum.performance / n,
            maintainability: sum.maintainability / n,
            test_coverage: sum.test_coverage / n,
            complexity: sum.complexity / n,
        }
    }
}

/// Outcome of executing one approach. Produced exactly once per approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachResult {
    /// Approach identifier.
    pub approach_id: ApproachId,
    /// Approach name.
    pub approach_name: String,
    /// Position of the approach in declaration order.
    pub ordinal: usize,
    /// Whether the executor succeeded.
    pub success: bool,
    /// Failure description.
    pub error: Option<String>,
    /// Wall-clock execution time.
    pub execution_time: Duration,
    /// Reported metrics; default on failure.
    pub metrics: QualityMetrics,
}

/// Aggregate view over all results of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Successful approaches.
    pub succeeded: usize,
    /// Failed approaches.
    pub failed: usize,
    /// Mean execution time across all results.
    pub average_execution_time: Duration,
    /// Mean metrics across successful results.
    pub average_metrics: QualityMetrics,
}

impl Analysis {
    /// Aggregates `results`.
    #[must_use]
    pub fn from_results(results: &[ApproachResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let total: Duration = results.iter().map(|r| r.execution_time).sum();
        let average_execution_time = u32::try_from(results.len())
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| total / n);
        Self {
            succeeded,
            failed: results.len() - succeeded,
            average_execution_time,
            average_metrics: QualityMetrics::average(
                results.iter().filter(|r| r.success).map(|r| &r.metrics),
            ),
        }
    }
}

/// Result of [`execute_approaches`](super::QuantumOrchestrator::execute_approaches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumExecutionResult {
    /// Quantum branch that was executed.
    pub quantum_branch_id: QuantumBranchId,
    /// One result per approach, in declaration order.
    pub results: Vec<ApproachResult>,
    /// Aggregates.
    pub analysis: Analysis,
    /// Whether at least one approach failed.
    pub partial_failure: bool,
}

/// A ranked approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedApproach {
    /// Approach identifier.
    pub approach_id: ApproachId,
    /// Approach name.
    pub approach_name: String,
    /// Score in `[0, 100]`.
    pub score: f64,
}

/// The winner of a quantum branch and its runners-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalApproachSelection {
    /// Quantum branch the selection belongs to.
    pub quantum_branch_id: QuantumBranchId,
    /// Winning approach.
    pub optimal_approach_id: ApproachId,
    /// Winning score in `[0, 100]`.
    pub score: f64,
    /// Gap between the two best scores, normalized to `[0, 1]`.
    pub confidence: f64,
    /// Up to three next-best approaches, best first.
    pub alternatives: Vec<RankedApproach>,
}
