//! Git collaborator interface.
//!
//! The core never runs Git itself. It asks a [`GitOperations`] implementation
//! for dedicated branches and for point-in-time branch state.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Errors reported by the Git collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GitError {
    /// A branch with this name already exists.
    #[error("branch already exists: {0}")]
    BranchExists(String),
    /// The branch is unknown to the repository.
    #[error("unknown branch: {0}")]
    UnknownBranch(String),
    /// The underlying Git invocation failed.
    #[error("git command failed: {0}")]
    Command(String),
}

/// A branch created on behalf of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitBranch {
    /// Identifier used for all later calls about this branch.
    pub branch_id: String,
    /// Commit hash the branch points at after creation.
    pub head_hash: String,
}

/// Captured state of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchState {
    /// Commit hash at capture time.
    pub git_hash: String,
    /// Human-readable description of changes since the previous capture.
    pub changes_summary: String,
}

/// Git plumbing used by the orchestration core.
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Creates branch `name` from `base`.
    async fn create_branch(&self, name: &str, base: &str) -> Result<GitBranch, GitError>;

    /// Captures the current state of `branch_id`.
    async fn capture_snapshot(&self, branch_id: &str) -> Result<BranchState, GitError>;
}

#[derive(Debug, Clone)]
struct BranchRecord {
    head: String,
    revision: u64,
    pending_changes: Vec<String>,
}

/// In-process stand-in for a Git repository.
///
/// Branch ids equal branch names and hashes are derived with SHA-256, so runs
/// are deterministic. Used by the daemon binary and by tests.
#[derive(Debug, Default)]
pub struct InMemoryGit {
    branches: RwLock<HashMap<String, BranchRecord>>,
}

impl InMemoryGit {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change on `branch_id` that the next capture will report.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::UnknownBranch`] if the branch does not exist.
    pub fn record_change(&self, branch_id: &str, description: impl Into<String>) -> Result<(), GitError> {
        let mut branches = self.branches.write();
        let record = branches
            .get_mut(branch_id)
            .ok_or_else(|| GitError::UnknownBranch(branch_id.to_string()))?;
        record.pending_changes.push(description.into());
        Ok(())
    }

    /// Returns the number of branches created so far.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.branches.read().len()
    }

    fn hash(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hex::encode(hasher.finalize());
        digest[..40].to_string()
    }
}

#[async_trait]
impl GitOperations for InMemoryGit {
    async fn create_branch(&self, name: &str, base: &str) -> Result<GitBranch, GitError> {
        if name.trim().is_empty() {
            return Err(GitError::Command("branch name cannot be empty".to_string()));
        }

        let mut branches = self.branches.write();
        if branches.contains_key(name) {
            return Err(GitError::BranchExists(name.to_string()));
        }

        let head = Self::hash(&[base, name]);
        branches.insert(
            name.to_string(),
            BranchRecord {
                head: head.clone(),
                revision: 0,
                pending_changes: Vec::new(),
            },
        );

        Ok(GitBranch {
            branch_id: name.to_string(),
            head_hash: head,
        })
    }

    async fn capture_snapshot(&self, branch_id: &str) -> Result<BranchState, GitError> {
        let mut branches = self.branches.write();
        let record = branches
            .get_mut(branch_id)
            .ok_or_else(|| GitError::UnknownBranch(branch_id.to_string()))?;

        let changes_summary = if record.pending_changes.is_empty() {
            "no changes".to_string()
        } else {
            let summary = record.pending_changes.join("; ");
            record.revision += 1;
            let revision = record.revision.to_string();
            record.head = Self::hash(&[record.head.as_str(), summary.as_str(), revision.as_str()]);
            record.pending_changes.clear();
            summary
        };

        Ok(BranchState {
            git_hash: record.head.clone(),
            changes_summary,
        })
    }
}
