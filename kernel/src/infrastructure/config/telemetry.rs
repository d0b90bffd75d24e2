//! Telemetry configuration for the Ramify kernel.

use serde::Deserialize;

/// Logging settings consumed by [`TelemetryBuilder`](crate::infrastructure::telemetry::TelemetryBuilder).
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Service name attached to log output.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default = "default_json")]
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            json: default_json(),
        }
    }
}

fn default_service_name() -> String {
    "ramify-kernel".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    true
}
