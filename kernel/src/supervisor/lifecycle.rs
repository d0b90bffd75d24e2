//! Per-loop lifecycle state and stop signalling.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of one background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Registered but not spawned.
    NotStarted,
    /// Spawned and ticking.
    Running,
    /// Stop signalled; the loop has not exited yet.
    StopRequested,
    /// The loop task has exited or was aborted.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Errors returned by the lifecycle supervisor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// `start` was called on a running supervisor.
    #[error("supervisor is already running")]
    AlreadyRunning,
    /// `start` or `register_task` was called after `stop`.
    #[error("supervisor has been stopped")]
    AlreadyStopped,
    /// A periodic task with this name is already registered.
    #[error("loop '{0}' is already registered")]
    DuplicateLoop(String),
    /// A periodic task was registered with a zero interval.
    #[error("loop '{0}' needs a non-zero interval")]
    ZeroInterval(String),
    /// Some loops did not exit within the shutdown timeout and were aborted.
    #[error("shutdown incomplete after {timeout:?}; aborted loops: {pending:?}")]
    ShutdownIncomplete {
        /// Names of the loops that had to be aborted.
        pending: Vec<String>,
        /// Configured shutdown timeout.
        timeout: Duration,
    },
}

/// Shared table of loop states, keyed by loop name.
pub(crate) type LoopStates = Arc<RwLock<BTreeMap<String, LoopState>>>;

/// The three ways a loop can be told to stop.
#[derive(Debug, Clone)]
pub struct LoopSignals {
    stop: watch::Receiver<bool>,
    token: CancellationToken,
    external: CancellationToken,
}

impl LoopSignals {
    pub(crate) fn new(
        stop: watch::Receiver<bool>,
        token: CancellationToken,
        external: CancellationToken,
    ) -> Self {
        Self {
            stop,
            token,
            external,
        }
    }

    /// Resolves as soon as any stop signal fires.
    ///
    /// A dropped stop sender counts as a stop.
    pub async fn triggered(&mut self) {
        tokio::select! {
            () = self.token.cancelled() => {}
            () = self.external.cancelled() => {}
            _ = self.stop.wait_for(|stop| *stop) => {}
        }
    }

    /// Token cancelled when this loop should stop, for cooperative work.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Marks a loop `Stopped` when its task ends, including by abort.
pub(crate) struct StoppedOnExit {
    pub(crate) states: LoopStates,
    pub(crate) name: String,
}

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.states
            .write()
            .insert(self.name.clone(), LoopState::Stopped);
        debug!(loop_name = %self.name, "Loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> (watch::Sender<bool>, CancellationToken, CancellationToken, LoopSignals) {
        let (tx, rx) = watch::channel(false);
        let token = CancellationToken::new();
        let external = CancellationToken::new();
        let signals = LoopSignals::new(rx, token.clone(), external.clone());
        (tx, token, external, signals)
    }

    #[tokio::test]
    async fn each_signal_triggers() {
        let (tx, _token, _external, mut by_watch) = signals();
        tx.send_replace(true);
        by_watch.triggered().await;

        let (_tx, token, _external, mut by_token) = signals();
        token.cancel();
        by_token.triggered().await;

        let (_tx, _token, external, mut by_external) = signals();
        external.cancel();
        by_external.triggered().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_signal_keeps_waiting() {
        let (_tx, _token, _external, mut signals) = signals();
        let waited = tokio::time::timeout(Duration::from_secs(1), signals.triggered()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn guard_marks_stopped() {
        let states: LoopStates = Arc::default();
        states.write().insert("sweep".into(), LoopState::Running);
        drop(StoppedOnExit {
            states: Arc::clone(&states),
            name: "sweep".into(),
        });
        assert_eq!(states.read().get("sweep"), Some(&LoopState::Stopped));
    }
}
