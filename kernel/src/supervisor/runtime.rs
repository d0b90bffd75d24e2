//! Lifecycle supervisor owning every background loop.
//!
//! Each loop waits on its ticker (or the event queue) and on three stop
//! signals: a child of the supervisor's root cancellation token, a shared
//! `watch` flag, and the caller's external token. Loop bodies run to
//! completion once started, so shutdown waits for them with a deadline and
//! aborts whatever is still running when it passes.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::lifecycle::{LoopSignals, LoopState, LoopStates, StoppedOnExit, SupervisorError};
use crate::events::EventBus;
use crate::infrastructure::config::OrchestrationSettings;
use crate::quantum::QuantumOrchestrator;
use crate::session::SessionRegistry;
use crate::snapshot::SnapshotStore;

/// Loop that expires sessions.
pub const SESSION_EXPIRY_LOOP: &str = "session-expiry";
/// Loop that dispatches queued events.
pub const EVENT_DISPATCH_LOOP: &str = "event-dispatch";
/// Loop that snapshots active branches.
pub const SNAPSHOT_SWEEP_LOOP: &str = "snapshot-sweep";
/// Loop that advances approach statuses from reported progress.
pub const QUANTUM_MONITOR_LOOP: &str = "quantum-monitor";

const ABORT_GRACE: Duration = Duration::from_millis(100);
/// Shortest ticker period; `interval_at` panics on zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Extra periodic work run by the supervisor alongside the built-in loops.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Runs one iteration. `cancel` fires when the supervisor stops.
    ///
    /// # Errors
    ///
    /// Errors are logged and the task runs again on the next tick.
    async fn run_once(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
}

struct RegisteredTask {
    name: String,
    interval: Duration,
    task: Arc<dyn PeriodicTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Starts and stops the orchestration core's background loops.
pub struct LifecycleSupervisor {
    settings: OrchestrationSettings,
    sessions: Arc<SessionRegistry>,
    events: Arc<EventBus>,
    snapshots: Arc<SnapshotStore>,
    quantum: Arc<QuantumOrchestrator>,
    tasks: Mutex<Vec<RegisteredTask>>,
    phase: Mutex<Phase>,
    root: CancellationToken,
    stop_tx: watch::Sender<bool>,
    states: LoopStates,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl std::fmt::Debug for LifecycleSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSupervisor")
            .field("phase", &*self.phase.lock())
            .field("loops", &*self.states.read())
            .finish_non_exhaustive()
    }
}

impl LifecycleSupervisor {
    /// Creates a supervisor over the given components. Nothing runs until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(
        settings: OrchestrationSettings,
        sessions: Arc<SessionRegistry>,
        events: Arc<EventBus>,
        snapshots: Arc<SnapshotStore>,
        quantum: Arc<QuantumOrchestrator>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let states: BTreeMap<String, LoopState> = [
            SESSION_EXPIRY_LOOP,
            EVENT_DISPATCH_LOOP,
            SNAPSHOT_SWEEP_LOOP,
            QUANTUM_MONITOR_LOOP,
        ]
        .into_iter()
        .map(|name| (name.to_string(), LoopState::NotStarted))
        .collect();

        Self {
            settings,
            sessions,
            events,
            snapshots,
            quantum,
            tasks: Mutex::new(Vec::new()),
            phase: Mutex::new(Phase::Idle),
            root: CancellationToken::new(),
            stop_tx,
            states: Arc::new(parking_lot::RwLock::new(states)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Registers an extra periodic loop. Only allowed before `start`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyRunning`] or
    /// [`SupervisorError::AlreadyStopped`] after `start`, and
    /// [`SupervisorError::DuplicateLoop`] if the name is taken, and
    /// [`SupervisorError::ZeroInterval`] for a zero `interval`.
    pub fn register_task(
        &self,
        name: impl Into<String>,
        interval: Duration,
        task: Arc<dyn PeriodicTask>,
    ) -> Result<(), SupervisorError> {
        match *self.phase.lock() {
            Phase::Idle => {}
            Phase::Running => return Err(SupervisorError::AlreadyRunning),
            Phase::Stopped => return Err(SupervisorError::AlreadyStopped),
        }

        let name = name.into();
        if interval.is_zero() {
            return Err(SupervisorError::ZeroInterval(name));
        }
        {
            let mut states = self.states.write();
            if states.contains_key(&name) {
                return Err(SupervisorError::DuplicateLoop(name));
            }
            states.insert(name.clone(), LoopState::NotStarted);
        }
        self.tasks.lock().push(RegisteredTask {
            name,
            interval,
            task,
        });
        Ok(())
    }

    /// Spawns every loop. Must be called from within a Tokio runtime.
    ///
    /// Loops also stop when `external` is cancelled; `stop` is still needed
    /// to collect them.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyRunning`] on a second call and
    /// [`SupervisorError::AlreadyStopped`] after `stop`.
    pub fn start(&self, external: &CancellationToken) -> Result<(), SupervisorError> {
        {
            let mut phase = self.phase.lock();
            match *phase {
                Phase::Idle => *phase = Phase::Running,
                Phase::Running => return Err(SupervisorError::AlreadyRunning),
                Phase::Stopped => return Err(SupervisorError::AlreadyStopped),
            }
        }

        let sessions = Arc::clone(&self.sessions);
        self.spawn_ticker(
            SESSION_EXPIRY_LOOP,
            self.settings.session_sweep_interval(),
            external,
            move || {
                let sessions = Arc::clone(&sessions);
                async move {
                    sessions.sweep_expired().await;
                }
            },
        );

        let events = Arc::clone(&self.events);
        self.spawn_loop(EVENT_DISPATCH_LOOP, external, move |mut signals| async move {
            if let Err(e) = events.run(signals.triggered()).await {
                warn!(error = %e, "Event dispatch loop did not start");
            }
        });

        let (sessions, quantum, snapshots) = (
            Arc::clone(&self.sessions),
            Arc::clone(&self.quantum),
            Arc::clone(&self.snapshots),
        );
        self.spawn_ticker(
            SNAPSHOT_SWEEP_LOOP,
            self.settings.snapshot_interval(),
            external,
            move || {
                let mut branch_ids = sessions.active_branch_ids();
                branch_ids.extend(quantum.active_branch_ids());
                let snapshots = Arc::clone(&snapshots);
                async move {
                    let taken = snapshots.snapshot_all(branch_ids).await;
                    debug!(taken, "Snapshot sweep finished");
                }
            },
        );

        let quantum = Arc::clone(&self.quantum);
        self.spawn_ticker(
            QUANTUM_MONITOR_LOOP,
            self.settings.progress_poll_interval(),
            external,
            move || {
                let changed = quantum.refresh_progress();
                if changed > 0 {
                    debug!(changed, "Approach statuses advanced");
                }
                std::future::ready(())
            },
        );

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for registered in tasks {
            let task = registered.task;
            let token = self.root.clone();
            let name = registered.name.clone();
            self.spawn_ticker(&registered.name, registered.interval, external, move || {
                let task = Arc::clone(&task);
                let token = token.clone();
                let name = name.clone();
                async move {
                    if let Err(e) = task.run_once(&token).await {
                        warn!(loop_name = %name, error = %e, "Periodic task failed");
                    }
                }
            });
        }

        info!(loops = self.handles.lock().len(), "Lifecycle supervisor started");
        Ok(())
    }

    fn spawn_loop<F, Fut>(&self, name: &str, external: &CancellationToken, body: F)
    where
        F: FnOnce(LoopSignals) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let signals = LoopSignals::new(
            self.stop_tx.subscribe(),
            self.root.child_token(),
            external.clone(),
        );
        self.states
            .write()
            .insert(name.to_string(), LoopState::Running);

        let on_exit = StoppedOnExit {
            states: Arc::clone(&self.states),
            name: name.to_string(),
        };
        let work = body(signals);
        let handle = tokio::spawn(
            async move {
                let _on_exit = on_exit;
                work.await;
            }
            .instrument(info_span!("loop", loop_name = %name)),
        );
        self.handles.lock().push((name.to_string(), handle));
    }

    fn spawn_ticker<F, Fut>(
        &self,
        name: &str,
        period: Duration,
        external: &CancellationToken,
        mut tick: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let loop_name = name.to_string();
        if period < MIN_PERIOD {
            warn!(loop_name = %loop_name, ?period, "Loop period too short; using 1ms");
        }
        let period = period.max(MIN_PERIOD);
        self.spawn_loop(name, external, move |mut signals| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = signals.triggered() => break,
                    _ = ticker.tick() => {}
                }
                let iteration = async { tick().await };
                if AssertUnwindSafe(iteration).catch_unwind().await.is_err() {
                    error!(loop_name = %loop_name, "Loop iteration panicked");
                }
            }
        });
    }

    /// Stops every loop within `shutdown_timeout`.
    ///
    /// Cancels the root token, flips the stop signal and waits for each loop
    /// until the shared deadline. Loops still running at the deadline are
    /// aborted. Calling `stop` again, or before `start`, returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::ShutdownIncomplete`] naming the loops that
    /// had to be aborted.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        {
            let mut phase = self.phase.lock();
            let previous = *phase;
            *phase = Phase::Stopped;
            if previous != Phase::Running {
                return Ok(());
            }
        }

        let timeout = self.settings.shutdown_timeout();
        info!(?timeout, "Stopping lifecycle supervisor");
        for state in self.states.write().values_mut() {
            if *state == LoopState::Running {
                *state = LoopState::StopRequested;
            }
        }
        self.root.cancel();
        self.stop_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock());
        let deadline = Instant::now() + timeout;
        let mut pending = Vec::new();
        for (name, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(loop_name = %name, "Loop joined"),
                Ok(Err(e)) => warn!(loop_name = %name, error = %e, "Loop task ended abnormally"),
                Err(_) => pending.push((name, handle)),
            }
        }

        if pending.is_empty() {
            info!("Lifecycle supervisor stopped");
            return Ok(());
        }

        for (_, handle) in &pending {
            handle.abort();
        }
        for (_, handle) in &mut pending {
            // Aborted tasks resolve promptly unless stuck in blocking code.
            let _ = tokio::time::timeout(ABORT_GRACE, handle).await;
        }

        let names: Vec<String> = pending.into_iter().map(|(name, _)| name).collect();
        {
            let mut states = self.states.write();
            for name in &names {
                states.insert(name.clone(), LoopState::Stopped);
            }
        }
        error!(pending = ?names, ?timeout, "Shutdown incomplete; loops aborted");
        Err(SupervisorError::ShutdownIncomplete {
            pending: names,
            timeout,
        })
    }

    /// Current state of every loop, keyed by name.
    #[must_use]
    pub fn loop_states(&self) -> BTreeMap<String, LoopState> {
        self.states.read().clone()
    }

    /// Whether `start` has run and `stop` has not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.phase.lock() == Phase::Running
    }
}

impl Drop for LifecycleSupervisor {
    fn drop(&mut self) {
        self.root.cancel();
        self.stop_tx.send_replace(true);
    }
}
