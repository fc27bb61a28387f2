//! Configuration management for the gateway.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults,
//! 2. an optional file, `config/meshgate.{toml,json,yaml}` or `MESHGATE_CONFIG`,
//! 3. the overrides file written when mesh settings change at runtime
//!    (`data/meshgate.settings.json` or `MESHGATE_SETTINGS_FILE`),
//! 4. environment variables such as `MESHGATE__MESH__PORT=32168`.
//!
//! # Example
//!
//! ```no_run
//! use meshgate::infrastructure::config::Settings;
//!
//! let settings = Settings::load().expect("Failed to load configuration");
//! println!("listening on {}", settings.server.port);
//! ```

pub mod mesh;
pub mod modules;
pub mod queue;
pub mod server;
pub mod store;
pub mod telemetry;

pub use mesh::MeshSettings;
pub use modules::{ModuleRouteSettings, ModuleSettings};
pub use queue::QueueSettings;
pub use server::ServerSettings;
pub use store::{DEFAULT_OVERRIDES_PATH, JsonSettingsStore, SettingsStore};
pub use telemetry::TelemetrySettings;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default static configuration file, without extension.
pub const DEFAULT_CONFIG_FILE: &str = "config/meshgate";

/// Top-level configuration for the gateway.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSettings,
    /// Logging settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    /// Queue timeouts.
    #[serde(default)]
    pub queue: QueueSettings,
    /// Mesh settings.
    #[serde(default)]
    pub mesh: MeshSettings,
    /// Analysis modules and their routes.
    #[serde(default)]
    pub modules: Vec<ModuleSettings>,
    /// Overrides file that runtime mesh changes are written to.
    #[serde(skip)]
    pub settings_file: PathBuf,
}

impl Settings {
    /// Loads settings from the default locations and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result does not deserialize.
    pub fn load() -> Result<Self, ConfigError> {
        let config_file =
            std::env::var("MESHGATE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let overrides = std::env::var("MESHGATE_SETTINGS_FILE")
            .unwrap_or_else(|_| DEFAULT_OVERRIDES_PATH.into());
        Self::load_from(Some(&config_file), overrides)
    }

    /// Loads settings from explicit file locations plus the environment.
    ///
    /// Missing files are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result does not deserialize.
    pub fn load_from(
        config_file: Option<&str>,
        overrides_path: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let overrides_path = overrides_path.as_ref();

        let mut builder = Config::builder()
            .set_default("server.host", server::default_host())?
            .set_default("server.port", i64::from(server::default_port()))?
            .set_default("telemetry.service_name", telemetry::default_service_name())?
            .set_default("telemetry.log_level", telemetry::default_log_level())?
            .set_default("mesh.service_name", mesh::default_service_name())?
            .set_default("mesh.port", i64::from(mesh::default_port()))?;

        if let Some(file) = config_file {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        let s = builder
            .add_source(
                File::from(overrides_path)
                    .format(FileFormat::Json)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("MESHGATE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("mesh.known_mesh_hostnames")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.settings_file = overrides_path.to_path_buf();
        Ok(settings)
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> BindAddress {
        BindAddress(self.server.host.clone(), self.server.port)
    }
}

/// Helper for strong typing addresses
pub struct BindAddress(pub String, pub u16);

impl BindAddress {
    /// Converts the bind address to a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP address string cannot be parsed.
    pub fn to_socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        let ip = self
            .0
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid IP address '{}': {e}", self.0))?;
        Ok(std::net::SocketAddr::new(ip, self.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_any_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(None, dir.path().join("none.json")).unwrap();

        assert_eq!(settings.server.port, 32168);
        assert_eq!(settings.queue.response_timeout_ms, 60_000);
        assert_eq!(settings.mesh, MeshSettings::default());
        assert!(settings.modules.is_empty());
    }

    #[test]
    fn overrides_file_wins_over_static_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("meshgate.toml");
        std::fs::write(
            &config,
            r#"
[server]
port = 5000

[mesh]
allow_request_forwarding = true
known_mesh_hostnames = ["node-b"]

[[modules]]
module_id = "vision"
queue = "vision_queue"

[[modules.routes]]
route = "vision/custom"
command = "custom"
"#,
        )
        .unwrap();
        let overrides = dir.path().join("overrides.json");
        std::fs::write(&overrides, r#"{"mesh":{"allow_request_forwarding":false}}"#).unwrap();

        let settings = Settings::load_from(config.to_str(), &overrides).unwrap();

        assert_eq!(settings.server.port, 5000);
        assert!(!settings.mesh.allow_request_forwarding);
        assert_eq!(settings.mesh.known_mesh_hostnames, vec!["node-b".to_string()]);
        assert_eq!(settings.modules[0].routes[0].method, "POST");
        assert_eq!(settings.settings_file, overrides);
    }

    #[test]
    fn bind_address_parses() {
        let addr = BindAddress("127.0.0.1".into(), 8080).to_socket_addr().unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(BindAddress("not-an-ip".into(), 1).to_socket_addr().is_err());
    }
}
