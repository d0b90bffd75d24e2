//! Per-branch bounded snapshot history.
//!
//! Each branch keeps its snapshots in creation order. Once a branch holds more
//! than `max_per_branch` snapshots the oldest ones are evicted.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use super::types::{SnapshotId, SnapshotStats, TemporalSnapshot, TimeRange};
use crate::collaborators::storage::{forget, persist};
use crate::collaborators::{collections, GitOperations, Storage};
use crate::error::{OrchestrationError, ResourceKind, Result};

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    evicted: AtomicU64,
    capture_failures: AtomicU64,
    storage_failures: AtomicU64,
}

/// Owns the snapshot history of every branch.
pub struct SnapshotStore {
    max_per_branch: usize,
    git: Arc<dyn GitOperations>,
    storage: Arc<dyn Storage>,
    branches: RwLock<HashMap<String, VecDeque<TemporalSnapshot>>>,
    counters: Counters,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("max_per_branch", &self.max_per_branch)
            .field("branch_count", &self.branches.read().len())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Creates an empty store keeping at most `max_per_branch` snapshots per branch.
    #[must_use]
    pub fn new(max_per_branch: usize, git: Arc<dyn GitOperations>, storage: Arc<dyn Storage>) -> Self {
        Self {
            max_per_branch: max_per_branch.max(1),
            git,
            storage,
            branches: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Captures `branch_id` and appends the snapshot to its history.
    ///
    /// # Errors
    ///
    /// Returns a Git error if the branch state cannot be captured.
    pub async fn create_snapshot(&self, branch_id: &str) -> Result<TemporalSnapshot> {
        self.create_snapshot_with(branch_id, HashMap::new()).await
    }

    /// Like [`create_snapshot`](Self::create_snapshot) with caller metadata attached.
    ///
    /// # Errors
    ///
    /// Returns a Git error if the branch state cannot be captured.
    #[instrument(skip(self, metadata))]
    pub async fn create_snapshot_with(
        &self,
        branch_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<TemporalSnapshot> {
        let state = match self.git.capture_snapshot(branch_id).await {
            Ok(state) => state,
            Err(e) => {
                self.counters.capture_failures.fetch_add(1, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let snapshot = TemporalSnapshot {
            id: SnapshotId::new(),
            branch_id: branch_id.to_string(),
            timestamp: Utc::now(),
            git_hash: state.git_hash,
            changes_summary: state.changes_summary,
            metadata,
        };

        let evicted: Vec<TemporalSnapshot> = {
            let mut branches = self.branches.write();
            let history = branches.entry(branch_id.to_string()).or_default();
            history.push_back(snapshot.clone());
            let excess = history.len().saturating_sub(self.max_per_branch);
            history.drain(..excess).collect()
        };

        self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.counters
            .evicted
            .fetch_add(evicted.len() as u64, Ordering::SeqCst);

        let mut stored = persist(
            self.storage.as_ref(),
            collections::SNAPSHOTS,
            &snapshot.id.to_string(),
            &snapshot,
        )
        .await;
        for old in &evicted {
            stored &= forget(self.storage.as_ref(), collections::SNAPSHOTS, &old.id.to_string()).await;
        }
        if !stored {
            self.counters.storage_failures.fetch_add(1, Ordering::SeqCst);
        }

        debug!(
            snapshot_id = %snapshot.id,
            git_hash = %snapshot.git_hash,
            evicted = evicted.len(),
            "Snapshot created"
        );
        Ok(snapshot)
    }

    /// Snapshots each distinct branch in `branch_ids` once.
    ///
    /// Failures are logged and skipped. Returns the number of snapshots taken.
    pub async fn snapshot_all<I>(&self, branch_ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let unique: BTreeSet<String> = branch_ids.into_iter().collect();
        let mut taken = 0;
        for branch_id in unique {
            match self.create_snapshot(&branch_id).await {
                Ok(_) => taken += 1,
                Err(e) => warn!(%branch_id, error = %e, "Periodic snapshot failed"),
            }
        }
        taken
    }

    /// Snapshots of `branch_id` inside `range`, in chronological order.
    #[must_use]
    pub fn query(&self, branch_id: &str, range: TimeRange) -> Vec<TemporalSnapshot> {
        self.branches
            .read()
            .get(branch_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|s| range.contains(s.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Looks up one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::NotFound`] if the snapshot is not retained.
    pub fn get(&self, branch_id: &str, id: SnapshotId) -> Result<TemporalSnapshot> {
        self.branches
            .read()
            .get(branch_id)
            .and_then(|history| history.iter().find(|s| s.id == id).cloned())
            .ok_or_else(|| OrchestrationError::not_found(ResourceKind::Snapshot, id))
    }

    /// Most recently created snapshot of `branch_id`.
    #[must_use]
    pub fn latest(&self, branch_id: &str) -> Option<TemporalSnapshot> {
        self.branches
            .read()
            .get(branch_id)
            .and_then(|history| history.back().cloned())
    }

    /// Number of snapshots retained for `branch_id`.
    #[must_use]
    pub fn count(&self, branch_id: &str) -> usize {
        self.branches.read().get(branch_id).map_or(0, VecDeque::len)
    }

    /// Branches with at least one snapshot, sorted.
    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        let mut names: Vec<String> = self.branches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Retention bound per branch.
    #[must_use]
    pub fn max_per_branch(&self) -> usize {
        self.max_per_branch
    }

    /// Snapshot of the store counters.
    #[must_use]
    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            created: self.counters.created.load(Ordering::SeqCst),
            evicted: self.counters.evicted.load(Ordering::SeqCst),
            capture_failures: self.counters.capture_failures.load(Ordering::SeqCst),
            storage_failures: self.counters.storage_failures.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GitError, InMemoryGit, InMemoryStorage};

    async fn store_with_branches(max: usize, names: &[&str]) -> (SnapshotStore, Arc<InMemoryGit>, Arc<InMemoryStorage>) {
        let git = Arc::new(InMemoryGit::new());
        for name in names {
            git.create_branch(name, "main").await.expect("branch");
        }
        let storage = Arc::new(InMemoryStorage::new());
        let store = SnapshotStore::new(
            max,
            Arc::clone(&git) as Arc<dyn GitOperations>,
            Arc::clone(&storage) as Arc<dyn Storage>,
        );
        (store, git, storage)
    }

    #[tokio::test]
    async fn retains_the_most_recent_snapshots() -> Result<()> {
        let (store, _, storage) = store_with_branches(2, &["b1"]).await;

        let first = store.create_snapshot("b1").await?;
        let second = store.create_snapshot("b1").await?;
        let third = store.create_snapshot("b1").await?;

        let retained = store.query("b1", TimeRange::all());
        let ids: Vec<SnapshotId> = retained.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id, third.id]);
        assert!(store.get("b1", first.id).is_err());
        assert_eq!(store.stats().evicted, 1);
        assert_eq!(storage.len(collections::SNAPSHOTS), 2);
        Ok(())
    }

    #[tokio::test]
    async fn query_filters_by_time_window() -> Result<()> {
        let (store, _, _) = store_with_branches(10, &["b1"]).await;
        store.create_snapshot("b1").await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let later = store.create_snapshot("b1").await?;

        let recent = store.query("b1", TimeRange::since(cutoff));
        assert_eq!(recent, vec![later.clone()]);
        assert_eq!(store.latest("b1"), Some(later));
        assert!(store.query("unknown", TimeRange::all()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn capture_failure_is_reported() {
        let (store, _, _) = store_with_branches(2, &[]).await;
        let err = store.create_snapshot("ghost").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Git(GitError::UnknownBranch(_))));
        assert_eq!(store.count("ghost"), 0);
        assert_eq!(store.stats().capture_failures, 1);
    }

    #[tokio::test]
    async fn snapshot_all_deduplicates_and_skips_failures() {
        let (store, git, _) = store_with_branches(5, &["a", "b"]).await;
        git.record_change("a", "touch a").expect("known branch");

        let taken = store
            .snapshot_all(vec!["a".to_string(), "b".to_string(), "a".to_string(), "ghost".to_string()])
            .await;

        assert_eq!(taken, 2);
        assert_eq!(store.branches(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.latest("a").map(|s| s.changes_summary), Some("touch a".to_string()));
    }
}
