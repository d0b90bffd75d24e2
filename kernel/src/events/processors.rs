//! Built-in event processors that drive the session registry and the
//! snapshot store from the bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use super::bus::EventProcessor;
use super::types::{BranchingEvent, EventType};
use crate::error::ValidationError;
use crate::session::{SessionId, SessionRegistry};
use crate::snapshot::SnapshotStore;

/// Context key naming the session scope.
pub const SCOPE_KEY: &str = "scope";
/// Context key holding an optional session duration in seconds.
pub const DURATION_KEY: &str = "duration_secs";
/// Context key naming the session to end.
pub const SESSION_ID_KEY: &str = "session_id";
/// Context key naming the branch to snapshot.
pub const BRANCH_ID_KEY: &str = "branch_id";

fn required<'a>(event: &'a BranchingEvent, key: &str) -> anyhow::Result<&'a str> {
    event
        .context_value(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ValidationError::MissingContext(key.to_string()).into())
}

/// Opens sessions on `SessionStart` and ends them on `SessionEnd`.
#[derive(Debug, Clone)]
pub struct SessionLifecycleProcessor {
    registry: Arc<SessionRegistry>,
}

impl SessionLifecycleProcessor {
    /// Creates a processor bound to `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    async fn start(&self, event: &BranchingEvent) -> anyhow::Result<()> {
        let scope = required(event, SCOPE_KEY)?;
        let duration = match event.context_value(DURATION_KEY) {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("invalid {DURATION_KEY}: {raw}"))?,
            ),
            None => Duration::ZERO,
        };

        let mut metadata: HashMap<String, String> = event
            .context
            .iter()
            .filter(|(k, _)| k.as_str() != SCOPE_KEY && k.as_str() != DURATION_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        metadata.insert("source".to_string(), event.source.clone());
        metadata.insert("event_id".to_string(), event.id.to_string());

        let session = self.registry.create_session(scope, duration, metadata).await?;
        debug!(event_id = %event.id, session_id = %session.id, "Session started from event");
        Ok(())
    }

    async fn end(&self, event: &BranchingEvent) -> anyhow::Result<()> {
        let raw = required(event, SESSION_ID_KEY)?;
        let id: SessionId = raw
            .parse()
            .with_context(|| format!("invalid {SESSION_ID_KEY}: {raw}"))?;
        self.registry.end_session(id).await?;
        Ok(())
    }
}

#[async_trait]
impl EventProcessor for SessionLifecycleProcessor {
    async fn process(&self, event: &BranchingEvent) -> anyhow::Result<()> {
        match event.event_type {
            EventType::SessionStart => self.start(event).await,
            EventType::SessionEnd => self.end(event).await,
            _ => anyhow::bail!("unsupported event type: {}", event.event_type),
        }
    }
}

/// Snapshots a branch on `SnapshotRequested`.
#[derive(Debug, Clone)]
pub struct SnapshotRequestProcessor {
    store: Arc<SnapshotStore>,
}

impl SnapshotRequestProcessor {
    /// Creates a processor bound to `store`.
    #[must_use]
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventProcessor for SnapshotRequestProcessor {
    async fn process(&self, event: &BranchingEvent) -> anyhow::Result<()> {
        let branch_id = required(event, BRANCH_ID_KEY)?;
        let metadata = HashMap::from([
            ("source".to_string(), event.source.clone()),
            ("event_id".to_string(), event.id.to_string()),
        ]);
        self.store.create_snapshot_with(branch_id, metadata).await?;
        Ok(())
    }
}
