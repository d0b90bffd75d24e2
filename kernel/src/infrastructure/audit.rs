use serde::Serialize;
use tracing::{info, info_span};

/// Lifecycle event recorded in the audit trail.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The kernel finished starting a component.
    SystemStartup {
        /// Component name.
        component: String,
    },
    /// The kernel is shutting down.
    SystemShutdown {
        /// Why shutdown began.
        reason: String,
    },
    /// Shutdown hit its deadline and aborted loops.
    ShutdownIncomplete {
        /// Loops that were aborted.
        pending: Vec<String>,
        /// Shutdown timeout in milliseconds.
        timeout_ms: u64,
    },
    /// Effective configuration at start-up.
    ConfigLoaded {
        /// Source of the configuration file, if any.
        file: Option<String>,
        /// Event queue capacity.
        event_queue_size: usize,
        /// Shutdown timeout in milliseconds.
        shutdown_timeout_ms: u64,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a separate sink.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Lifecycle audit event");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_audit_variants() {
        log_audit(&AuditEvent::SystemStartup {
            component: "Test".into(),
        });
        log_audit(&AuditEvent::SystemShutdown {
            reason: "Testing".into(),
        });
        log_audit(&AuditEvent::ShutdownIncomplete {
            pending: vec!["snapshot-sweep".into()],
            timeout_ms: 5000,
        });
        log_audit(&AuditEvent::ConfigLoaded {
            file: None,
            event_queue_size: 1000,
            shutdown_timeout_ms: 5000,
        });
    }

    #[test]
    fn audit_events_are_tagged() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(AuditEvent::ShutdownIncomplete {
            pending: vec!["a".into()],
            timeout_ms: 10,
        })?;
        assert_eq!(json["event_type"], "shutdown_incomplete");
        assert_eq!(json["pending"][0], "a");
        Ok(())
    }
}
