//! Mesh configuration.
//!
//! Every field has a default so a partial `mesh` section, or none at all,
//! still yields a working node. Intervals are plain milliseconds so they
//! can be set from environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mesh discovery, monitoring and forwarding settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshSettings {
    /// Master switch for the mesh.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Send UDP heartbeats.
    #[serde(default = "default_true")]
    pub enable_status_broadcast: bool,
    /// Listen for heartbeats and ping known servers.
    #[serde(default = "default_true")]
    pub enable_status_monitoring: bool,
    /// Process requests forwarded by peers.
    #[serde(default = "default_true")]
    pub accept_forwarded_requests: bool,
    /// Forward local requests to faster peers.
    #[serde(default = "default_true")]
    pub allow_request_forwarding: bool,
    /// Forward to a peer's hostname; when off, to the address its status came from.
    #[serde(default = "default_true")]
    pub route_via_hostname: bool,
    /// Peers pinged directly because broadcast cannot reach them (`host` or `host:port`).
    #[serde(default)]
    pub known_mesh_hostnames: Vec<String>,
    /// Timeout of a single known-server ping.
    #[serde(default = "default_ping_timeout_ms")]
    pub mesh_server_ping_timeout_ms: u64,
    /// Service tag that prefixes every datagram.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// UDP port for heartbeats.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Gap between heartbeats and between inactivity sweeps.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Gap between rounds of known-server pings.
    #[serde(default = "default_server_ping_interval_ms")]
    pub server_ping_interval_ms: u64,
    /// How long a failed known server is left alone.
    #[serde(default = "default_ping_error_recovery_timeout_ms")]
    pub ping_error_recovery_timeout_ms: u64,
    /// Silence after which a peer is considered inactive.
    #[serde(default = "default_heartbeat_inactive_timeout_ms")]
    pub heartbeat_inactive_timeout_ms: u64,
    /// Gap between route metric decay passes.
    #[serde(default = "default_update_timing_metrics_interval_ms")]
    pub update_timing_metrics_interval_ms: u64,
    /// Idle time after which a route's metrics start to decay.
    #[serde(default = "default_route_inactivity_timeout_ms")]
    pub route_inactivity_timeout_ms: u64,
    /// Overrides the OS hostname reported to peers.
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            enable: true,
            enable_status_broadcast: true,
            enable_status_monitoring: true,
            accept_forwarded_requests: true,
            allow_request_forwarding: true,
            route_via_hostname: true,
            known_mesh_hostnames: Vec::new(),
            mesh_server_ping_timeout_ms: default_ping_timeout_ms(),
            service_name: default_service_name(),
            port: default_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            server_ping_interval_ms: default_server_ping_interval_ms(),
            ping_error_recovery_timeout_ms: default_ping_error_recovery_timeout_ms(),
            heartbeat_inactive_timeout_ms: default_heartbeat_inactive_timeout_ms(),
            update_timing_metrics_interval_ms: default_update_timing_metrics_interval_ms(),
            route_inactivity_timeout_ms: default_route_inactivity_timeout_ms(),
            hostname: None,
        }
    }
}

impl MeshSettings {
    /// Mesh is on and at least one of broadcast or monitoring is on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enable && (self.enable_status_broadcast || self.enable_status_monitoring)
    }

    /// Whether switching from `self` to `other` needs the monitor restarted.
    #[must_use]
    pub fn requires_restart(&self, other: &Self) -> bool {
        self.enable != other.enable
            || self.enable_status_broadcast != other.enable_status_broadcast
            || self.enable_status_monitoring != other.enable_status_monitoring
            || self.port != other.port
    }

    /// Ping timeout.
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.mesh_server_ping_timeout_ms)
    }

    /// Heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Known-server ping interval.
    #[must_use]
    pub fn server_ping_interval(&self) -> Duration {
        Duration::from_millis(self.server_ping_interval_ms)
    }

    /// Backoff after a failed ping.
    #[must_use]
    pub fn ping_error_recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_error_recovery_timeout_ms)
    }

    /// Inactivity threshold for peers.
    #[must_use]
    pub fn heartbeat_inactive_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_inactive_timeout_ms)
    }

    /// Metric decay interval.
    #[must_use]
    pub fn update_timing_metrics_interval(&self) -> Duration {
        Duration::from_millis(self.update_timing_metrics_interval_ms)
    }

    /// Route inactivity threshold.
    #[must_use]
    pub fn route_inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.route_inactivity_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_ping_timeout_ms() -> u64 {
    5_000
}

pub(super) fn default_service_name() -> String {
    "CodeProject.AI-Mesh".to_string()
}

pub(super) fn default_port() -> u16 {
    32168
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_server_ping_interval_ms() -> u64 {
    60_000
}

fn default_ping_error_recovery_timeout_ms() -> u64 {
    120_000
}

fn default_heartbeat_inactive_timeout_ms() -> u64 {
    15_000
}

fn default_update_timing_metrics_interval_ms() -> u64 {
    10_000
}

fn default_route_inactivity_timeout_ms() -> u64 {
    60_000
}
