//! Quantum branches: several approaches to one goal, run concurrently,
//! scored, and reduced to a single optimal choice.

pub mod executor;
pub mod orchestrator;
pub mod scorer;
pub mod types;

pub use executor::{
    ApproachContext, ApproachError, ApproachExecutor, ApproachOutcome, ProgressHandle,
    SimulatedExecutor,
};
pub use orchestrator::QuantumOrchestrator;
pub use scorer::{Scorer, WeightedScorer};
pub use types::{
    Analysis, Approach, ApproachConfig, ApproachId, ApproachResult, ApproachStatus,
    OptimalApproachSelection, QualityMetrics, QuantumBranch, QuantumBranchId,
    QuantumExecutionResult, QuantumStatus, RankedApproach,
};
