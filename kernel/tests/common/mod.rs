//! Shared fixtures for the kernel integration tests.

#![allow(dead_code, missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ramify_kernel::collaborators::{
    GitOperations, InMemoryGit, InMemoryStorage, Notification, Notifier, NotifierError, Storage,
    StorageError,
};
use ramify_kernel::events::EventBus;
use ramify_kernel::infrastructure::config::OrchestrationSettings;
use ramify_kernel::quantum::{
    ApproachContext, ApproachError, ApproachExecutor, ApproachOutcome, ApproachResult,
    QualityMetrics, QuantumOrchestrator, Scorer,
};
use ramify_kernel::session::SessionRegistry;
use ramify_kernel::snapshot::SnapshotStore;
use ramify_kernel::supervisor::LifecycleSupervisor;

/// Notifier that keeps every notification it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    pub received: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifierError> {
        self.received.lock().push(notification.clone());
        Ok(())
    }
}

/// Storage backend that is permanently unavailable.
#[derive(Default)]
pub struct DownStorage;

#[async_trait]
impl Storage for DownStorage {
    async fn store(&self, _: &str, _: &str, _: serde_json::Value) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("maintenance".into()))
    }

    async fn get(&self, _: &str, _: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Err(StorageError::Unavailable("maintenance".into()))
    }

    async fn update(&self, _: &str, _: &str, _: serde_json::Value) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("maintenance".into()))
    }

    async fn delete(&self, _: &str, _: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("maintenance".into()))
    }
}

/// What a scripted approach does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed after `delay` with the given performance metric.
    Succeed { delay: Duration, performance: f64 },
    /// Fail after `delay`.
    Fail { delay: Duration },
}

/// Executor driven by a per-approach-name script. Unknown names succeed
/// immediately with performance 50.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
}

impl ScriptedExecutor {
    pub fn with(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }
}

#[async_trait]
impl ApproachExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: ApproachContext) -> Result<ApproachOutcome, ApproachError> {
        let script = self.scripts.get(&ctx.name).cloned().unwrap_or(Script::Succeed {
            delay: Duration::ZERO,
            performance: 50.0,
        });
        let delay = match &script {
            Script::Succeed { delay, .. } | Script::Fail { delay } => *delay,
        };
        ctx.progress.set(10);
        tokio::select! {
            () = ctx.cancel.cancelled() => return Err(ApproachError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        ctx.progress.set(100);
        match script {
            Script::Succeed { performance, .. } => Ok(ApproachOutcome {
                metrics: QualityMetrics {
                    performance,
                    ..QualityMetrics::default()
                },
                summary: format!("{} done", ctx.name),
            }),
            Script::Fail { .. } => Err(ApproachError::Failed(format!("{} failed", ctx.name))),
        }
    }
}

/// Scores an approach by its performance metric alone.
pub struct PerformanceScorer;

impl Scorer for PerformanceScorer {
    fn score(&self, result: &ApproachResult) -> f64 {
        result.metrics.performance
    }
}

/// Every component of the orchestration core wired with test collaborators.
pub struct Harness {
    pub settings: OrchestrationSettings,
    pub git: Arc<InMemoryGit>,
    pub notifier: Arc<RecordingNotifier>,
    pub sessions: Arc<SessionRegistry>,
    pub events: Arc<EventBus>,
    pub snapshots: Arc<SnapshotStore>,
    pub quantum: Arc<QuantumOrchestrator>,
}

impl Harness {
    pub fn new(settings: OrchestrationSettings) -> Self {
        Self::build(settings, Arc::new(InMemoryStorage::new()), Arc::new(ScriptedExecutor::default()))
    }

    pub fn build(
        settings: OrchestrationSettings,
        storage: Arc<dyn Storage>,
        executor: Arc<dyn ApproachExecutor>,
    ) -> Self {
        let git = Arc::new(InMemoryGit::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sessions = Arc::new(SessionRegistry::new(
            settings.clone(),
            git.clone(),
            Arc::clone(&storage),
            notifier.clone(),
        ));
        let snapshots = Arc::new(SnapshotStore::new(
            settings.max_snapshots_per_branch,
            git.clone(),
            Arc::clone(&storage),
        ));
        let quantum = Arc::new(
            QuantumOrchestrator::new(
                settings.clone(),
                git.clone(),
                storage,
                notifier.clone(),
                executor,
            )
            .with_scorer(Arc::new(PerformanceScorer)),
        );
        let events = Arc::new(EventBus::new(settings.event_queue_size, settings.immediate_dispatch));
        Self {
            settings,
            git,
            notifier,
            sessions,
            events,
            snapshots,
            quantum,
        }
    }

    pub fn git_ops(&self) -> Arc<dyn GitOperations> {
        self.git.clone()
    }

    pub fn supervisor(&self) -> LifecycleSupervisor {
        LifecycleSupervisor::new(
            self.settings.clone(),
            Arc::clone(&self.sessions),
            Arc::clone(&self.events),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.quantum),
        )
    }
}

/// Polls `check` every 5ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
