//! Session registry for the Ramify kernel.
//!
//! Sessions are bounded-lifetime units of branching work, each tied to one
//! Git branch. The registry creates, ends and expires them.

pub mod registry;
pub mod types;

pub use registry::SessionRegistry;
pub use types::{Session, SessionId, SessionStats, SessionStatus};
