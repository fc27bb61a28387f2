//! Mesh data types shared by the monitor, the manager and the HTTP layer.

use crate::mesh::identity::split_host_port;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Platform string reported by servers running inside a container.
pub const DOCKER_PLATFORM: &str = "Docker";

/// Description stored for a known server that failed to answer a ping.
pub const UNRESPONSIVE_DESCRIPTION: &str = "Unknown: server unresponsive";

/// Platform stored for a known server that failed to answer a ping.
pub const UNKNOWN_PLATFORM: &str = "Unknown";

fn default_code() -> u16 {
    200
}

/// Status a server broadcasts about itself and serves at `/v1/server/mesh/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshServerBroadcastData {
    /// Machine hostname of the sender.
    #[serde(default)]
    pub hostname: String,
    /// Human readable OS and hardware description.
    #[serde(default)]
    pub system_description: String,
    /// Runtime platform, e.g. `Windows`, `Linux`, `Docker`.
    #[serde(default)]
    pub platform: String,
    /// Routes this server processes itself.
    #[serde(default)]
    pub enabled_routes: Option<Vec<String>>,
    /// Whether the server sends UDP heartbeats.
    #[serde(default)]
    pub is_broadcasting: bool,
    /// Whether the server listens for heartbeats and pings known servers.
    #[serde(default)]
    pub is_monitoring: bool,
    /// Whether the server processes requests forwarded by peers.
    #[serde(default)]
    pub accept_forwarded_requests: bool,
    /// Whether the server forwards its own requests to peers.
    #[serde(default)]
    pub allow_request_forwarding: bool,
    /// Hostnames the server pings directly.
    #[serde(default)]
    pub known_hostnames: Option<Vec<String>>,
    /// HTTP-like status; 200 when healthy.
    #[serde(default = "default_code")]
    pub code: u16,
}

impl Default for MeshServerBroadcastData {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            system_description: String::new(),
            platform: String::new(),
            enabled_routes: None,
            is_broadcasting: false,
            is_monitoring: false,
            accept_forwarded_requests: false,
            allow_request_forwarding: false,
            known_hostnames: None,
            code: default_code(),
        }
    }
}

impl MeshServerBroadcastData {
    /// Placeholder recorded for a known server that could not be reached.
    #[must_use]
    pub fn unresponsive(hostname: &str, code: u16) -> Self {
        Self {
            hostname: hostname.to_owned(),
            system_description: UNRESPONSIVE_DESCRIPTION.to_owned(),
            platform: UNKNOWN_PLATFORM.to_owned(),
            code,
            ..Self::default()
        }
    }

    /// Returns `true` if the server advertises `route` (case-insensitive).
    #[must_use]
    pub fn serves_route(&self, route: &str) -> bool {
        self.enabled_routes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|r| r.eq_ignore_ascii_case(route))
    }

    /// Returns `true` if `hostname` is in the known hostname list.
    #[must_use]
    pub fn knows_hostname(&self, hostname: &str) -> bool {
        self.known_hostnames
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|h| h.eq_ignore_ascii_case(hostname))
    }

    /// Returns `true` if the sender runs in a container.
    #[must_use]
    pub fn is_docker(&self) -> bool {
        self.platform.eq_ignore_ascii_case(DOCKER_PLATFORM)
    }
}

/// One server as known to this node.
#[derive(Debug, Clone)]
pub struct MeshServerRoutingEntry {
    /// Name used to reach the server over HTTP.
    pub callable_hostname: String,
    /// Address the last heartbeat came from.
    pub endpoint_ip: Option<IpAddr>,
    /// `true` for this node's own entry.
    pub is_local: bool,
    /// `false` once contact has lapsed.
    pub is_active: bool,
    /// Time of the last heartbeat or successful ping.
    pub last_contact: Instant,
    /// Latest status the server reported.
    pub status: MeshServerBroadcastData,
}

impl MeshServerRoutingEntry {
    /// Creates an entry contacted `now`. It starts inactive so the first
    /// activation is observable.
    #[must_use]
    pub fn new(
        callable_hostname: impl Into<String>,
        endpoint_ip: Option<IpAddr>,
        is_local: bool,
        status: MeshServerBroadcastData,
        now: Instant,
    ) -> Self {
        Self {
            callable_hostname: callable_hostname.into(),
            endpoint_ip,
            is_local,
            is_active: false,
            last_contact: now,
            status,
        }
    }

    /// Host (with any configured port) requests for this server are sent to.
    ///
    /// With `route_via_hostname` off, the address the server was last heard
    /// from replaces the host part.
    #[must_use]
    pub fn forward_host(&self, route_via_hostname: bool) -> String {
        match self.endpoint_ip.filter(|_| !route_via_hostname) {
            None => self.callable_hostname.clone(),
            Some(ip) => match split_host_port(&self.callable_hostname).1 {
                Some(port) => SocketAddr::new(ip, port).to_string(),
                None => ip.to_string(),
            },
        }
    }

    /// Time since the last contact, as of `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_contact)
    }
}

impl fmt::Display for MeshServerRoutingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.callable_hostname)?;
        if let Some(ip) = self.endpoint_ip {
            write!(f, " / {ip}")?;
        }
        if self.is_local {
            write!(f, " (localhost)")?;
        } else if !self
            .callable_hostname
            .eq_ignore_ascii_case(&self.status.hostname)
        {
            write!(f, " ({})", self.status.hostname)?;
        }
        if !self.is_active {
            write!(f, " NOT ACTIVE")?;
        }
        Ok(())
    }
}

/// Ping bookkeeping for a statically known server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownMeshServerPingStatus {
    /// Hostname, optionally with `:port`.
    pub hostname: String,
    /// `true` when the entry points back at this node.
    pub is_loopback: bool,
    /// Status code of the last ping, if one completed.
    pub last_status_code: Option<u16>,
    /// When the last ping failed.
    pub last_error: Option<Instant>,
    /// Round trip of the last successful ping.
    pub response_ms: u64,
}

impl KnownMeshServerPingStatus {
    /// Creates an entry that has never been pinged.
    #[must_use]
    pub fn new(hostname: impl Into<String>, is_loopback: bool) -> Self {
        Self {
            hostname: hostname.into(),
            is_loopback,
            last_status_code: None,
            last_error: None,
            response_ms: 0,
        }
    }

    /// Returns `true` while a previous failure is younger than `recovery`.
    #[must_use]
    pub fn in_backoff(&self, recovery: Duration, now: Instant) -> bool {
        self.last_error
            .is_some_and(|at| now.saturating_duration_since(at) < recovery)
    }
}

impl fmt::Display for KnownMeshServerPingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hostname)?;
        if self.is_loopback {
            write!(f, " (localhost)")?;
        }
        match self.last_status_code {
            Some(code) => write!(f, " ({code})"),
            None => write!(f, " (not contacted)"),
        }
    }
}
