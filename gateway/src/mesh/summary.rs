//! Mesh summary served to dashboards.

use crate::mesh::types::MeshServerRoutingEntry;
use serde::Serialize;
use std::fmt::Write;

const INDENT: &str = "    ";

/// Performance of one route on one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshServerRoutePerformance {
    /// Route, e.g. `vision/custom`.
    pub route: String,
    /// Mean of the recent response times in milliseconds.
    pub effective_response_time: f64,
    /// Real requests recorded.
    pub number_of_requests: u64,
}

/// One server with its route performance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshServerSummary {
    /// Name used to reach the server.
    pub callable_hostname: String,
    /// Address the server was last heard from.
    pub end_point_ip_address: Option<String>,
    /// This node's own entry.
    pub is_local_server: bool,
    /// Currently active.
    pub is_active: bool,
    /// Hostname the server reports.
    pub hostname: String,
    /// System description the server reports.
    pub system_description: String,
    /// Platform the server reports.
    pub platform: String,
    /// Broadcast flag the server reports.
    pub is_broadcasting: bool,
    /// Monitoring flag the server reports.
    pub is_monitoring: bool,
    /// Forwarding flag the server reports.
    pub allow_request_forwarding: bool,
    /// Accept flag the server reports.
    pub accept_forwarded_requests: bool,
    /// Known hostnames the server reports.
    pub known_hostnames: Option<Vec<String>>,
    /// Per-route performance.
    pub route_infos: Vec<MeshServerRoutePerformance>,
    /// Human readable block for this server.
    pub summary: String,
}

impl MeshServerSummary {
    /// Builds the summary of `entry`.
    #[must_use]
    pub fn new(entry: &MeshServerRoutingEntry, route_infos: Vec<MeshServerRoutePerformance>) -> Self {
        let status = &entry.status;
        let mut summary = Self {
            callable_hostname: entry.callable_hostname.clone(),
            end_point_ip_address: entry.endpoint_ip.map(|ip| ip.to_string()),
            is_local_server: entry.is_local,
            is_active: entry.is_active,
            hostname: status.hostname.clone(),
            system_description: status.system_description.clone(),
            platform: status.platform.clone(),
            is_broadcasting: status.is_broadcasting,
            is_monitoring: status.is_monitoring,
            allow_request_forwarding: status.allow_request_forwarding,
            accept_forwarded_requests: status.accept_forwarded_requests,
            known_hostnames: status.known_hostnames.clone(),
            route_infos,
            summary: String::new(),
        };
        summary.summary = summary.render();
        summary
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{INDENT}Server {}", self.hostname);
        let _ = writeln!(out, "{INDENT}System:              {}", self.system_description);
        if self.is_local_server {
            let address = self.end_point_ip_address.as_deref().unwrap_or(&self.callable_hostname);
            let _ = writeln!(out, "{INDENT}IP Address:          {address}");
        }
        let _ = writeln!(out, "{INDENT}Active:              {}", self.is_active);
        let _ = writeln!(out, "{INDENT}Forwarding Requests: {}", self.allow_request_forwarding);
        let _ = writeln!(out, "{INDENT}Accepting Requests:  {}", self.accept_forwarded_requests);

        if let Some(known) = &self.known_hostnames {
            let _ = writeln!(out, "{INDENT}Known servers:");
            for hostname in known {
                let _ = writeln!(out, "{INDENT}{INDENT}{hostname}");
            }
        }

        let _ = writeln!(out, "{INDENT}Routes:");
        let width = self.route_infos.iter().map(|r| r.route.len()).max().unwrap_or(0) + 4;
        for route in &self.route_infos {
            let _ = writeln!(
                out,
                "{INDENT}{INDENT}{:<width$}{}ms, {} requests",
                route.route, route.effective_response_time, route.number_of_requests
            );
        }
        out
    }
}

/// Everything this node knows about the mesh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshSummary {
    /// All servers, local first.
    pub server_infos: Vec<MeshServerSummary>,
    /// Human readable mesh status.
    pub summary: String,
}

impl MeshSummary {
    /// Builds the summary and its text.
    #[must_use]
    pub fn new(server_infos: Vec<MeshServerSummary>) -> Self {
        let summary = render(&server_infos);
        Self {
            server_infos,
            summary,
        }
    }

    /// This node's entry, if present.
    #[must_use]
    pub fn local_server(&self) -> Option<&MeshServerSummary> {
        self.server_infos.iter().find(|s| s.is_local_server)
    }

    /// Summary of the server reporting `hostname`.
    #[must_use]
    pub fn server(&self, hostname: &str) -> Option<&MeshServerSummary> {
        self.server_infos
            .iter()
            .find(|s| s.hostname.eq_ignore_ascii_case(hostname))
    }
}

fn render(servers: &[MeshServerSummary]) -> String {
    let local = servers.iter().find(|s| s.is_local_server);
    let mut out = String::new();
    let _ = writeln!(out, "Current Server mesh status");
    let _ = writeln!(out, " ");

    match local {
        None => {
            let _ = writeln!(out, "{INDENT}Active:       false");
            let _ = writeln!(out, "{INDENT}Broadcasting: false");
            let _ = writeln!(out, "{INDENT}Monitoring:   false");
            let _ = writeln!(out, " ");
        }
        Some(local) => {
            let _ = writeln!(out, "{INDENT}Broadcasting: {}", local.is_broadcasting);
            let _ = writeln!(out, "{INDENT}Monitoring:   {}", local.is_monitoring);
            let _ = writeln!(out, " ");
            out.push_str(&local.summary);
            let _ = writeln!(out, " ");
        }
    }

    let remotes: Vec<&MeshServerSummary> = servers.iter().filter(|s| !s.is_local_server).collect();
    let _ = writeln!(out, "Remote Servers in mesh: {}", remotes.len());
    let _ = writeln!(out, " ");
    for (index, remote) in remotes.iter().enumerate() {
        if index > 0 {
            let _ = writeln!(out, " ");
        }
        out.push_str(&remote.summary);
    }

    out.trim().to_string()
}
