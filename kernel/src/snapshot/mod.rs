//! Temporal snapshot retention.
//!
//! Snapshots are immutable captures of a branch, kept per branch up to a
//! configured bound and evicted oldest-first.

pub mod store;
pub mod types;

pub use store::SnapshotStore;
pub use types::{SnapshotId, SnapshotStats, TemporalSnapshot, TimeRange};
