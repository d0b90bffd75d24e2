//! Ramify kernel daemon: wires the orchestration core with in-memory
//! collaborators and runs it until Ctrl-C or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use ramify_kernel::collaborators::{GitOperations, InMemoryGit, InMemoryStorage, LogNotifier, Notifier, Storage};
use ramify_kernel::events::{EventBus, EventType, SessionLifecycleProcessor, SnapshotRequestProcessor};
use ramify_kernel::infrastructure::config::{Settings, CONFIG_PATH_ENV};
use ramify_kernel::infrastructure::{audit, telemetry::TelemetryBuilder};
use ramify_kernel::quantum::{QuantumOrchestrator, SimulatedExecutor};
use ramify_kernel::session::SessionRegistry;
use ramify_kernel::snapshot::SnapshotStore;
use ramify_kernel::supervisor::{LifecycleSupervisor, SupervisorError};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::new().context("Failed to load configuration")?;

    TelemetryBuilder::from_settings(&config.telemetry, env!("CARGO_PKG_VERSION"))
        .init()
        .context("Failed to initialize telemetry")?;

    info!("Ramify Kernel Starting...");
    let orchestration = config.orchestration.clone();
    audit::log_audit(&audit::AuditEvent::ConfigLoaded {
        file: std::env::var(CONFIG_PATH_ENV).ok(),
        event_queue_size: orchestration.event_queue_size,
        shutdown_timeout_ms: orchestration.shutdown_timeout_ms,
    });

    let git: Arc<dyn GitOperations> = Arc::new(InMemoryGit::new());
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let sessions = Arc::new(SessionRegistry::new(
        orchestration.clone(),
        Arc::clone(&git),
        Arc::clone(&storage),
        Arc::clone(&notifier),
    ));
    let snapshots = Arc::new(SnapshotStore::new(
        orchestration.max_snapshots_per_branch,
        Arc::clone(&git),
        Arc::clone(&storage),
    ));
    let quantum = Arc::new(QuantumOrchestrator::new(
        orchestration.clone(),
        Arc::clone(&git),
        Arc::clone(&storage),
        Arc::clone(&notifier),
        Arc::new(SimulatedExecutor::default()),
    ));

    let events = Arc::new(EventBus::new(
        orchestration.event_queue_size,
        orchestration.immediate_dispatch,
    ));
    let lifecycle = Arc::new(SessionLifecycleProcessor::new(Arc::clone(&sessions)));
    events.register_processor(EventType::SessionStart, lifecycle.clone());
    events.register_processor(EventType::SessionEnd, lifecycle);
    events.register_processor(
        EventType::SnapshotRequested,
        Arc::new(SnapshotRequestProcessor::new(Arc::clone(&snapshots))),
    );

    let supervisor = LifecycleSupervisor::new(orchestration, sessions, events, snapshots, quantum);
    let external = CancellationToken::new();
    supervisor.start(&external)?;
    audit::log_audit(&audit::AuditEvent::SystemStartup {
        component: "Supervisor".into(),
    });

    info!("Ramify Kernel Initialized. Waiting for shutdown signal...");

    shutdown_signal().await;

    info!("Shutdown signal received, cleaning up...");
    audit::log_audit(&audit::AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });

    match supervisor.stop().await {
        Ok(()) => info!("Ramify Kernel Shutdown Complete."),
        Err(SupervisorError::ShutdownIncomplete { pending, timeout }) => {
            warn!(?pending, ?timeout, "Ramify Kernel Shutdown Incomplete.");
            audit::log_audit(&audit::AuditEvent::ShutdownIncomplete {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                pending,
            });
        }
        Err(e) => error!(error = %e, "Failed to stop supervisor"),
    }
    external.cancel();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
