//! HTTP server configuration.

use serde::Deserialize;
use std::time::Duration;

/// Server binding and forwarding settings.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on. Peers reach this node on the same port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout of a request forwarded to a peer.
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,
    /// Response time recorded against a peer whose forward failed.
    #[serde(default = "default_forward_penalty_ms")]
    pub forward_penalty_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            forward_timeout_ms: default_forward_timeout_ms(),
            forward_penalty_ms: default_forward_penalty_ms(),
        }
    }
}

impl ServerSettings {
    /// Forward timeout as a [`Duration`].
    #[must_use]
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}

pub(super) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(super) fn default_port() -> u16 {
    32168
}

fn default_forward_timeout_ms() -> u64 {
    30_000
}

fn default_forward_penalty_ms() -> u64 {
    30_000
}
