//! Session domain types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a new `SessionId` with a random UUID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `SessionId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// First eight hex digits, used in branch names.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is in the active map.
    Active,
    /// Session was ended explicitly.
    Ended,
    /// Session record was moved to the archive.
    Archived,
    /// Session outlived its duration and was ended by the sweep.
    Expired,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
            Self::Archived => write!(f, "archived"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A bounded-lifetime unit of branching work tied to one Git branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// What the session works on (e.g. "feature", "hotfix").
    pub scope: String,
    /// Current status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the session left the active map.
    pub ended_at: Option<DateTime<Utc>>,
    /// Lifetime after which the sweep ends the session.
    pub duration: Duration,
    /// Git branch backing the session.
    pub branch_id: String,
    /// Caller-supplied metadata.
    pub metadata: HashMap<String, String>,
}

impl Session {
    /// Instant after which the session counts as expired.
    ///
    /// `None` when the duration does not fit the calendar range, i.e. never.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.created_at.checked_add_signed(d))
    }

    /// Whether `created_at + duration < now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at < now)
    }
}

/// Counters kept by the session registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Sessions created.
    pub created: u64,
    /// Sessions ended explicitly.
    pub ended: u64,
    /// Sessions ended by the expiry sweep.
    pub expired: u64,
    /// Storage writes that failed and were skipped.
    pub storage_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(duration: Duration) -> Session {
        Session {
            id: SessionId::new(),
            scope: "feature".into(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            ended_at: None,
            duration,
            branch_id: "session/feature/x".into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn session_expires_strictly_after_duration() {
        let s = session(Duration::from_secs(60));
        let at = s.expires_at().unwrap();
        assert!(!s.is_expired_at(at));
        assert!(s.is_expired_at(at + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn huge_duration_never_expires() {
        let s = session(Duration::MAX);
        assert!(s.expires_at().is_none());
        assert!(!s.is_expired_at(Utc::now() + chrono::Duration::days(365 * 100)));
    }

    #[test]
    fn session_id_round_trips_through_display() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn status_display_is_lowercase() {
        assert_eq!(SessionStatus::Expired.to_string(), "expired");
        assert_eq!(SessionStatus::Active.to_string(), "active");
    }
}
