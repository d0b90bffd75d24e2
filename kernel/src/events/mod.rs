//! Branching event bus.
//!
//! Events are queued into a bounded channel and dispatched one at a time to
//! the processor registered for their [`EventType`].

pub mod bus;
pub mod processors;
pub mod types;

pub use bus::{EventBus, EventProcessor};
pub use processors::{SessionLifecycleProcessor, SnapshotRequestProcessor};
pub use types::{BranchingEvent, EventBusStats, EventId, EventPriority, EventType};
