//! Orchestration core configuration for the Ramify kernel.
//!
//! This module defines queue sizes, timeouts and limits shared by the session
//! registry, event bus, snapshot store, quantum orchestrator and supervisor.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;

/// Settings for the orchestration core.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct OrchestrationSettings {
    /// Capacity of the event bus queue (default: 1000)
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,

    /// Process high-priority events on the publisher's task (default: true)
    #[serde(default = "default_true")]
    pub immediate_dispatch: bool,

    /// Session duration applied when a caller passes zero (default: 3600)
    #[serde(default = "default_session_duration_secs")]
    pub default_session_duration_secs: u64,

    /// Longest session a caller may request (default: 86400)
    #[serde(default = "default_max_session_duration_secs")]
    pub max_session_duration_secs: u64,

    /// Interval between session expiry sweeps in milliseconds (default: 60000)
    #[serde(default = "default_session_sweep_interval_ms")]
    pub session_sweep_interval_ms: u64,

    /// Snapshots retained per branch (default: 100)
    #[serde(default = "default_max_snapshots_per_branch")]
    pub max_snapshots_per_branch: usize,

    /// Interval between snapshot sweeps in milliseconds (default: 300000)
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Maximum approaches per quantum branch (default: 5)
    #[serde(default = "default_max_parallel_approaches")]
    pub max_parallel_approaches: usize,

    /// Upper bound for a single approach execution in milliseconds (default: 600000)
    #[serde(default = "default_approach_timeout_ms")]
    pub approach_timeout_ms: u64,

    /// Interval between quantum progress polls in milliseconds (default: 500)
    #[serde(default = "default_progress_poll_interval_ms")]
    pub progress_poll_interval_ms: u64,

    /// Bound on the supervisor's shutdown wait in milliseconds (default: 5000)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Branch new session and approach branches are cut from (default: "main")
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Write ended sessions to the archive collection (default: true)
    #[serde(default = "default_true")]
    pub archive_ended_sessions: bool,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            event_queue_size: default_event_queue_size(),
            immediate_dispatch: default_true(),
            default_session_duration_secs: default_session_duration_secs(),
            max_session_duration_secs: default_max_session_duration_secs(),
            session_sweep_interval_ms: default_session_sweep_interval_ms(),
            max_snapshots_per_branch: default_max_snapshots_per_branch(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            max_parallel_approaches: default_max_parallel_approaches(),
            approach_timeout_ms: default_approach_timeout_ms(),
            progress_poll_interval_ms: default_progress_poll_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            base_branch: default_base_branch(),
            archive_ended_sessions: default_true(),
        }
    }
}

impl OrchestrationSettings {
    /// Checks that the settings describe a usable core.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSetting`] for the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            ("event_queue_size", self.event_queue_size as u64),
            ("max_snapshots_per_branch", self.max_snapshots_per_branch as u64),
            ("max_parallel_approaches", self.max_parallel_approaches as u64),
            ("max_session_duration_secs", self.max_session_duration_secs),
            ("session_sweep_interval_ms", self.session_sweep_interval_ms),
            ("snapshot_interval_ms", self.snapshot_interval_ms),
            ("approach_timeout_ms", self.approach_timeout_ms),
            ("progress_poll_interval_ms", self.progress_poll_interval_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ValidationError::InvalidSetting {
                name: (*name).to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.default_session_duration_secs > self.max_session_duration_secs {
            return Err(ValidationError::InvalidSetting {
                name: "default_session_duration_secs".to_string(),
                reason: format!(
                    "exceeds max_session_duration_secs ({})",
                    self.max_session_duration_secs
                ),
            });
        }

        if self.base_branch.trim().is_empty() {
            return Err(ValidationError::InvalidSetting {
                name: "base_branch".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Session duration applied when the caller passes zero.
    #[must_use]
    pub fn default_session_duration(&self) -> Duration {
        Duration::from_secs(self.default_session_duration_secs)
    }

    /// Longest session a caller may request.
    #[must_use]
    pub fn max_session_duration(&self) -> Duration {
        Duration::from_secs(self.max_session_duration_secs)
    }

    /// Interval between session expiry sweeps.
    #[must_use]
    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.session_sweep_interval_ms)
    }

    /// Interval between snapshot sweeps.
    #[must_use]
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    /// Upper bound for a single approach execution.
    #[must_use]
    pub fn approach_timeout(&self) -> Duration {
        Duration::from_millis(self.approach_timeout_ms)
    }

    /// Interval between quantum progress polls.
    #[must_use]
    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress_poll_interval_ms)
    }

    /// Bound on the supervisor's shutdown wait.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_event_queue_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_session_duration_secs() -> u64 {
    3600
}

fn default_max_session_duration_secs() -> u64 {
    86_400
}

fn default_session_sweep_interval_ms() -> u64 {
    60_000
}

fn default_max_snapshots_per_branch() -> usize {
    100
}

fn default_snapshot_interval_ms() -> u64 {
    300_000
}

fn default_max_parallel_approaches() -> usize {
    5
}

fn default_approach_timeout_ms() -> u64 {
    600_000
}

fn default_progress_poll_interval_ms() -> u64 {
    500
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_base_branch() -> String {
    "main".to_string()
}
