//! Outbound notification interface.
//!
//! Notifications are sent after a state transition has committed. Delivery
//! runs on a detached task and a failure never rolls the transition back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

/// State transitions reported to external systems.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A session became active.
    SessionCreated {
        /// Session identifier.
        session_id: String,
        /// Git branch backing the session.
        branch_id: String,
    },
    /// A session left the active map.
    SessionEnded {
        /// Session identifier.
        session_id: String,
        /// Final status.
        status: String,
    },
    /// A quantum branch was created.
    QuantumBranchCreated {
        /// Quantum branch identifier.
        quantum_branch_id: String,
        /// Number of approaches.
        approaches: usize,
    },
    /// All approaches of a quantum branch reported a result.
    QuantumBranchExecuted {
        /// Quantum branch identifier.
        quantum_branch_id: String,
        /// Approaches that succeeded.
        succeeded: usize,
        /// Approaches that failed.
        failed: usize,
    },
    /// An optimal approach was chosen.
    OptimalApproachSelected {
        /// Quantum branch identifier.
        quantum_branch_id: String,
        /// Winning approach.
        approach_id: String,
        /// Selection confidence in `[0, 1]`.
        confidence: f64,
    },
}

/// Errors reported by a notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// The notification could not be delivered.
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Receiver of state-transition notifications (webhooks, workflow engines).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    async fn notify(&self, notification: &Notification) -> Result<(), NotifierError>;
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifierError> {
        let json = serde_json::to_string(notification)
            .map_err(|e| NotifierError::Delivery(e.to_string()))?;
        info!(target: "notifications", notification = %json, "Notification");
        Ok(())
    }
}

/// Sends `notification` on a detached task, logging delivery failures.
pub fn notify_detached(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            warn!(error = %e, ?notification, "Notifier failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_with_kind_tag() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&Notification::SessionEnded {
            session_id: "s1".into(),
            status: "expired".into(),
        })?;
        assert_eq!(json, r#"{"kind":"session_ended","session_id":"s1","status":"expired"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        let result = LogNotifier
            .notify(&Notification::QuantumBranchCreated {
                quantum_branch_id: "q".into(),
                approaches: 2,
            })
            .await;
        assert!(result.is_ok());
    }
}
