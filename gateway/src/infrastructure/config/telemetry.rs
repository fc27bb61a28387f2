//! Logging configuration.

use serde::Deserialize;

/// Telemetry configuration settings.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// Service name attached to log records.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON lines instead of human readable text.
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

pub(super) fn default_service_name() -> String {
    "meshgate".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    true
}
