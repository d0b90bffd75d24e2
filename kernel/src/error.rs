//! Error types shared by the orchestration core.
//!
//! Core-logic failures (validation, capacity, not-found, cancellation) are
//! surfaced to the caller through [`OrchestrationError`]. Collaborator
//! failures that must not abort a state transition (storage, notifications)
//! have their own types and are logged where they occur.

use std::fmt;

use crate::collaborators::GitError;

/// Kind of resource a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A session in the registry.
    Session,
    /// A quantum branch in the orchestrator.
    QuantumBranch,
    /// A snapshot in the snapshot store.
    Snapshot,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::QuantumBranch => write!(f, "quantum branch"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Bad or missing input. Returned synchronously and never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Session scope is empty.
    #[error("session scope cannot be empty")]
    EmptyScope,
    /// Requested session duration is longer than allowed.
    #[error("session duration {requested_secs}s exceeds maximum {max_secs}s")]
    DurationTooLong {
        /// Requested duration in seconds.
        requested_secs: u64,
        /// Configured maximum in seconds.
        max_secs: u64,
    },
    /// Quantum branch name is empty.
    #[error("quantum branch name cannot be empty")]
    EmptyQuantumName,
    /// Quantum branch was requested without approaches.
    #[error("quantum branch needs at least one approach")]
    NoApproaches,
    /// More approaches than the orchestrator runs in parallel.
    #[error("requested {requested} approaches, but maximum is {max}")]
    TooManyApproaches {
        /// Number of approaches requested.
        requested: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Two approach configurations share a name.
    #[error("duplicate approach name: {0}")]
    DuplicateApproachName(String),
    /// Approach configuration at `index` has no name.
    #[error("approach at position {index} has no name")]
    MissingApproachName {
        /// Position of the configuration in the request.
        index: usize,
    },
    /// Named approach has no strategy.
    #[error("approach '{name}' has no strategy")]
    MissingApproachStrategy {
        /// Name of the offending approach.
        name: String,
    },
    /// Selection was requested over results without a single success.
    #[error("no successful approach results to select from")]
    NoSuccessfulResults,
    /// A result refers to an approach the quantum branch does not own.
    #[error("approach {approach_id} does not belong to quantum branch {quantum_branch_id}")]
    UnknownApproach {
        /// Quantum branch the selection was requested for.
        quantum_branch_id: String,
        /// Approach named by the result.
        approach_id: String,
    },
    /// Operation requires a different lifecycle state.
    #[error("{resource} {id} is {actual}, expected {expected}")]
    InvalidState {
        /// Kind of resource.
        resource: ResourceKind,
        /// Identifier of the resource.
        id: String,
        /// State required by the operation.
        expected: String,
        /// State the resource is in.
        actual: String,
    },
    /// Event is missing a context key its processor needs.
    #[error("event context is missing '{0}'")]
    MissingContext(String),
    /// Configuration value is unusable.
    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting {
        /// Setting name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors returned by orchestration core operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// Event queue is saturated; the caller decides whether to retry.
    #[error("event queue full (capacity {capacity})")]
    Capacity {
        /// Queue capacity.
        capacity: usize,
    },
    /// Unknown identifier.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of resource looked up.
        kind: ResourceKind,
        /// Identifier that was not found.
        id: String,
    },
    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,
    /// Event bus is no longer accepting events.
    #[error("event bus is closed")]
    Closed,
    /// Git collaborator failed.
    #[error("git operation failed: {0}")]
    Git(#[from] GitError),
}

impl OrchestrationError {
    /// Builds a [`OrchestrationError::NotFound`] for `kind` and `id`.
    pub fn not_found(kind: ResourceKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result alias for orchestration core operations.
pub type Result<T, E = OrchestrationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_names_resource() {
        let err = OrchestrationError::not_found(ResourceKind::Session, "abc");
        assert_eq!(err.to_string(), "session not found: abc");
    }

    #[test]
    fn validation_error_converts() {
        let err: OrchestrationError = ValidationError::DuplicateApproachName("a".into()).into();
        assert!(matches!(err, OrchestrationError::Validation(_)));
        assert!(err.to_string().contains("duplicate approach name: a"));
    }

    #[test]
    fn capacity_display_includes_capacity() {
        let err = OrchestrationError::Capacity { capacity: 4 };
        assert!(err.to_string().contains('4'));
    }
}
