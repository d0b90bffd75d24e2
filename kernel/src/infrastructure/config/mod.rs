//! Configuration management for the Ramify kernel.
//!
//! Settings are resolved once at start-up from built-in defaults, an optional
//! configuration file and `RAMIFY__*` environment variables, in that order.
//!
//! # Example
//!
//! ```no_run
//! use ramify_kernel::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! assert!(settings.orchestration.event_queue_size > 0);
//! ```

pub mod orchestration;
pub mod telemetry;

pub use orchestration::OrchestrationSettings;
pub use telemetry::TelemetrySettings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Environment variable naming an optional configuration file.
pub const CONFIG_PATH_ENV: &str = "RAMIFY_CONFIG";

/// Top-level configuration for the Ramify kernel.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    /// Orchestration core settings.
    #[serde(default)]
    pub orchestration: OrchestrationSettings,
}

impl Settings {
    /// Creates a new settings instance from defaults, the file named by
    /// `RAMIFY_CONFIG` (if any) and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built, deserialized or
    /// fails validation.
    pub fn new() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load(file.as_deref().map(Path::new))
    }

    /// Loads settings with an explicit optional configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, a value has the wrong
    /// type, or the orchestration settings are inconsistent.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("telemetry.service_name", "ramify-kernel")?
            .set_default("telemetry.log_level", "info")?
            .set_default("telemetry.json", true)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Self = builder
            .add_source(Environment::with_prefix("RAMIFY").separator("__"))
            .build()?
            .try_deserialize()?;

        settings
            .orchestration
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_without_sources_uses_defaults() -> Result<(), ConfigError> {
        let settings = Settings::load(None)?;
        assert_eq!(settings.telemetry.service_name, "ramify-kernel");
        assert_eq!(settings.orchestration, OrchestrationSettings::default());
        Ok(())
    }

    #[test]
    fn load_reads_values_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            "[orchestration]\nevent_queue_size = 7\nmax_snapshots_per_branch = 3\n\n[telemetry]\nlog_level = \"debug\""
        )?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.orchestration.event_queue_size, 7);
        assert_eq!(settings.orchestration.max_snapshots_per_branch, 3);
        assert_eq!(settings.telemetry.log_level, "debug");
        // Untouched fields keep their defaults.
        assert_eq!(settings.orchestration.max_parallel_approaches, 5);
        Ok(())
    }

    #[test]
    fn load_rejects_inconsistent_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "[orchestration]\nevent_queue_size = 0")?;

        let result = Settings::load(Some(file.path()));
        assert!(result.is_err());
        Ok(())
    }
}
