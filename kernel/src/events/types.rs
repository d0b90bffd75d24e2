//! Branching event types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(uuid::Uuid);

impl EventId {
    /// Creates a new `EventId` with a random UUID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of branching event. Processors are registered per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Request to open a session.
    SessionStart,
    /// Request to end a session.
    SessionEnd,
    /// Request to snapshot a branch.
    SnapshotRequested,
    /// A commit landed on a managed branch.
    CommitPushed,
    /// A managed branch was merged.
    BranchMerged,
    /// A quantum approach finished executing.
    ApproachCompleted,
    /// Application-defined event kind.
    Custom(String),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionStart => write!(f, "session_start"),
            Self::SessionEnd => write!(f, "session_end"),
            Self::SnapshotRequested => write!(f, "snapshot_requested"),
            Self::CommitPushed => write!(f, "commit_pushed"),
            Self::BranchMerged => write!(f, "branch_merged"),
            Self::ApproachCompleted => write!(f, "approach_completed"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Dispatch priority.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Background work.
    Low,
    /// Regular events.
    #[default]
    Normal,
    /// Eligible for immediate dispatch.
    High,
    /// Eligible for immediate dispatch.
    Critical,
}

impl EventPriority {
    /// Whether events of this priority bypass the queue when immediate
    /// dispatch is enabled.
    #[must_use]
    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// An event flowing through the bus. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchingEvent {
    /// Event identifier.
    pub id: EventId,
    /// Kind of event.
    pub event_type: EventType,
    /// Component or caller that raised the event.
    pub source: String,
    /// Free-form parameters read by processors.
    pub context: HashMap<String, String>,
    /// Dispatch priority.
    pub priority: EventPriority,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Whether the event was raised by the system rather than a user.
    pub auto_created: bool,
}

impl BranchingEvent {
    /// Creates a normal-priority event.
    #[must_use]
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            source: source.into(),
            context: HashMap::new(),
            priority: EventPriority::Normal,
            created_at: Utc::now(),
            auto_created: false,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Marks the event as system-raised.
    #[must_use]
    pub fn auto_created(mut self) -> Self {
        self.auto_created = true;
        self
    }

    /// Returns a context value.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

/// Counters kept by the event bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventBusStats {
    /// Events accepted into the queue or dispatched immediately.
    pub submitted: u64,
    /// Events a processor handled successfully.
    pub processed: u64,
    /// Events whose processor returned an error or panicked.
    pub failed: u64,
    /// Events rejected because the queue was full or closed.
    pub rejected: u64,
    /// Events with no registered processor.
    pub unhandled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let event = BranchingEvent::new(EventType::SessionStart, "cli")
            .with_priority(EventPriority::Critical)
            .with_context("scope", "auth")
            .auto_created();

        assert_eq!(event.source, "cli");
        assert_eq!(event.priority, EventPriority::Critical);
        assert_eq!(event.context_value("scope"), Some("auth"));
        assert_eq!(event.context_value("missing"), None);
        assert!(event.auto_created);
    }

    #[test]
    fn only_high_and_critical_are_urgent() {
        assert!(!EventPriority::Low.is_urgent());
        assert!(!EventPriority::Normal.is_urgent());
        assert!(EventPriority::High.is_urgent());
        assert!(EventPriority::Critical.is_urgent());
    }

    #[test]
    fn custom_event_type_display() {
        assert_eq!(EventType::Custom("lint".into()).to_string(), "custom:lint");
        assert_eq!(EventType::CommitPushed.to_string(), "commit_pushed");
    }
}
