//! Temporal snapshot types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(uuid::Uuid);

impl SnapshotId {
    /// Creates a new `SnapshotId` with a random UUID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable point-in-time capture of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalSnapshot {
    /// Snapshot identifier.
    pub id: SnapshotId,
    /// Branch the snapshot belongs to.
    pub branch_id: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Commit hash at capture time.
    pub git_hash: String,
    /// Changes since the previous capture.
    pub changes_summary: String,
    /// Caller-supplied metadata.
    pub metadata: HashMap<String, String>,
}

/// Inclusive time window for snapshot queries. Open ends match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest timestamp to include.
    pub start: Option<DateTime<Utc>>,
    /// Latest timestamp to include.
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Range matching every timestamp.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Range `[start, end]`.
    #[must_use]
    pub const fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Range `[start, ∞)`.
    #[must_use]
    pub const fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Whether `ts` falls inside the range.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| ts >= start) && self.end.map_or(true, |end| ts <= end)
    }
}

/// Counters kept by the snapshot store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    /// Snapshots created.
    pub created: u64,
    /// Snapshots evicted by the retention bound.
    pub evicted: u64,
    /// Capture attempts that failed.
    pub capture_failures: u64,
    /// Storage writes that failed and were skipped.
    pub storage_failures: u64,
}
