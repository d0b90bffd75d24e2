//! Registry of active sessions.
//!
//! The active map is the source of truth for "is this session active right
//! now". Storage writes and notifications happen after the map has been
//! updated and the lock released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use super::types::{Session, SessionId, SessionStats, SessionStatus};
use crate::collaborators::storage::{forget, persist};
use crate::collaborators::{collections, notify_detached, GitOperations, Notification, Notifier, Storage};
use crate::error::{OrchestrationError, ResourceKind, Result, ValidationError};
use crate::infrastructure::config::OrchestrationSettings;

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    ended: AtomicU64,
    expired: AtomicU64,
    storage_failures: AtomicU64,
}

/// Owns the map of active sessions.
pub struct SessionRegistry {
    settings: OrchestrationSettings,
    git: Arc<dyn GitOperations>,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    active: RwLock<HashMap<SessionId, Session>>,
    counters: Counters,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active_count", &self.active_count())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        settings: OrchestrationSettings,
        git: Arc<dyn GitOperations>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            git,
            storage,
            notifier,
            active: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Creates a session backed by a fresh Git branch.
    ///
    /// A zero `duration` is replaced by the configured default.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty scope or a duration above the
    /// configured maximum, and a Git error if the branch cannot be created.
    #[instrument(skip(self, metadata), fields(scope = %scope))]
    pub async fn create_session(
        &self,
        scope: &str,
        duration: Duration,
        metadata: HashMap<String, String>,
    ) -> Result<Session> {
        let scope = scope.trim();
        if scope.is_empty() {
            return Err(ValidationError::EmptyScope.into());
        }

        let duration = if duration.is_zero() {
            self.settings.default_session_duration()
        } else {
            duration
        };
        let max = self.settings.max_session_duration();
        if duration > max {
            return Err(ValidationError::DurationTooLong {
                requested_secs: duration.as_secs(),
                max_secs: max.as_secs(),
            }
            .into());
        }

        let id = SessionId::new();
        let branch_name = format!("session/{}/{}", slug(scope), id.short());
        let branch = self
            .git
            .create_branch(&branch_name, &self.settings.base_branch)
            .await?;

        let session = Session {
            id,
            scope: scope.to_string(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            ended_at: None,
            duration,
            branch_id: branch.branch_id,
            metadata,
        };

        self.active.write().insert(id, session.clone());
        self.counters.created.fetch_add(1, Ordering::SeqCst);

        if !persist(
            self.storage.as_ref(),
            collections::SESSIONS,
            &id.to_string(),
            &session,
        )
        .await
        {
            self.counters.storage_failures.fetch_add(1, Ordering::SeqCst);
        }

        notify_detached(
            &self.notifier,
            Notification::SessionCreated {
                session_id: id.to_string(),
                branch_id: session.branch_id.clone(),
            },
        );

        info!(session_id = %id, branch_id = %session.branch_id, ?duration, "Session created");
        Ok(session)
    }

    /// Ends an active session.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::NotFound`] if the session is not active.
    #[instrument(skip(self))]
    pub async fn end_session(&self, id: SessionId) -> Result<Session> {
        let session = self
            .active
            .write()
            .remove(&id)
            .ok_or_else(|| OrchestrationError::not_found(ResourceKind::Session, id))?;

        Ok(self.finish(session, SessionStatus::Ended).await)
    }

    /// Ends every session whose `created_at + duration` lies in the past.
    ///
    /// Returns the sessions that were expired.
    pub async fn sweep_expired(&self) -> Vec<Session> {
        let now = Utc::now();
        let expired: Vec<Session> = {
            let mut active = self.active.write();
            let ids: Vec<SessionId> = active
                .values()
                .filter(|s| s.is_expired_at(now))
                .map(|s| s.id)
                .collect();
            ids.iter().filter_map(|id| active.remove(id)).collect()
        };

        if expired.is_empty() {
            return expired;
        }

        let mut finished = Vec::with_capacity(expired.len());
        for session in expired {
            finished.push(self.finish(session, SessionStatus::Expired).await);
        }
        info!(count = finished.len(), "Expired sessions swept");
        finished
    }

    /// Shared exit path for explicit ends and expiry.
    async fn finish(&self, mut session: Session, status: SessionStatus) -> Session {
        session.status = status;
        session.ended_at = Some(Utc::now());

        match status {
            SessionStatus::Expired => self.counters.expired.fetch_add(1, Ordering::SeqCst),
            _ => self.counters.ended.fetch_add(1, Ordering::SeqCst),
        };

        let key = session.id.to_string();
        let mut stored = forget(self.storage.as_ref(), collections::SESSIONS, &key).await;
        if self.settings.archive_ended_sessions {
            let mut archived = session.clone();
            archived.status = SessionStatus::Archived;
            archived
                .metadata
                .insert("end_reason".to_string(), status.to_string());
            stored &= persist(
                self.storage.as_ref(),
                collections::SESSION_ARCHIVE,
                &key,
                &archived,
            )
            .await;
        }
        if !stored {
            self.counters.storage_failures.fetch_add(1, Ordering::SeqCst);
        }

        notify_detached(
            &self.notifier,
            Notification::SessionEnded {
                session_id: key,
                status: status.to_string(),
            },
        );

        debug!(session_id = %session.id, %status, "Session finished");
        session
    }

    /// Returns an active session.
    #[must_use]
    pub fn get_session(&self, id: SessionId) -> Option<Session> {
        self.active.read().get(&id).cloned()
    }

    /// Returns all active sessions, oldest first.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.active.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Number of active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Git branches backing the active sessions.
    #[must_use]
    pub fn active_branch_ids(&self) -> Vec<String> {
        self.active
            .read()
            .values()
            .map(|s| s.branch_id.clone())
            .collect()
    }

    /// Snapshot of the registry counters.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            created: self.counters.created.load(Ordering::SeqCst),
            ended: self.counters.ended.load(Ordering::SeqCst),
            expired: self.counters.expired.load(Ordering::SeqCst),
            storage_failures: self.counters.storage_failures.load(Ordering::SeqCst),
        }
    }
}

/// Lowercases `scope` and replaces anything but ASCII alphanumerics with `-`.
pub(crate) fn slug(scope: &str) -> String {
    scope
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
