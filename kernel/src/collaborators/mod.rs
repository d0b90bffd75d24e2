//! External collaborators of the orchestration core.
//!
//! Git plumbing, persistence and outbound notifications live outside the
//! core; it only talks to them through the traits re-exported here.

pub mod git;
pub mod notifier;
pub mod storage;

pub use git::{BranchState, GitBranch, GitError, GitOperations, InMemoryGit};
pub use notifier::{notify_detached, LogNotifier, Notification, Notifier, NotifierError};
pub use storage::{collections, InMemoryStorage, Storage, StorageError};
