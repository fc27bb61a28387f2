//! Builds the status this node advertises to the mesh.

use crate::infrastructure::config::MeshSettings;
use crate::mesh::types::{DOCKER_PLATFORM, MeshServerBroadcastData};
use crate::modules::ProcessStatusTable;
use std::path::Path;
use std::sync::Arc;
use sysinfo::System;

/// Monitor state a builder may draw on.
#[derive(Debug)]
pub struct BroadcastContext<'a> {
    /// Local hostname.
    pub hostname: &'a str,
    /// Hostnames of discovered peers, excluding this node.
    pub known_hostnames: Vec<String>,
    /// Current mesh settings.
    pub settings: &'a MeshSettings,
}

/// Produces the status carried by heartbeats and served over HTTP.
pub trait BroadcastBuilder: Send + Sync {
    /// Builds the status for the current moment.
    fn build(&self, context: &BroadcastContext<'_>) -> MeshServerBroadcastData;
}

/// Advertises the mesh routes of running modules.
#[derive(Debug)]
pub struct ModuleBroadcastBuilder {
    processes: Arc<ProcessStatusTable>,
    system_description: String,
    platform: String,
}

impl ModuleBroadcastBuilder {
    /// Creates a builder over the process table, probing the host description once.
    #[must_use]
    pub fn new(processes: Arc<ProcessStatusTable>) -> Self {
        Self::with_system(processes, describe_system(), detect_platform())
    }

    /// Creates a builder with a fixed description and platform.
    #[must_use]
    pub fn with_system(
        processes: Arc<ProcessStatusTable>,
        system_description: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            processes,
            system_description: system_description.into(),
            platform: platform.into(),
        }
    }
}

impl BroadcastBuilder for ModuleBroadcastBuilder {
    fn build(&self, context: &BroadcastContext<'_>) -> MeshServerBroadcastData {
        let settings = context.settings;
        MeshServerBroadcastData {
            hostname: context.hostname.to_owned(),
            system_description: self.system_description.clone(),
            platform: self.platform.clone(),
            enabled_routes: Some(self.processes.started_routes()),
            is_broadcasting: settings.enable && settings.enable_status_broadcast,
            is_monitoring: settings.enable && settings.enable_status_monitoring,
            accept_forwarded_requests: settings.enable && settings.accept_forwarded_requests,
            allow_request_forwarding: settings.enable && settings.allow_request_forwarding,
            known_hostnames: Some(context.known_hostnames.clone()),
            code: 200,
        }
    }
}

/// OS name and architecture, e.g. `Linux (Ubuntu 24.04) (x86_64)`.
#[must_use]
pub fn describe_system() -> String {
    let os = System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string());
    format!("{os} ({})", std::env::consts::ARCH)
}

/// `Docker` inside a container, otherwise the OS family.
#[must_use]
pub fn detect_platform() -> String {
    if Path::new("/.dockerenv").exists() {
        return DOCKER_PLATFORM.to_string();
    }
    match std::env::consts::OS {
        "windows" => "Windows".to_string(),
        "macos" => "macOS".to_string(),
        "linux" => "Linux".to_string(),
        other => other.to_string(),
    }
}
