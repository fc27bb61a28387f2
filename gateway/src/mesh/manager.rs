//! Routing policy over the mesh monitor.
//!
//! The manager decides which server handles a request, keeps per-server
//! route metrics and applies settings changes coming from the API. Metrics
//! are keyed by the callable hostname of each server and are wiped whenever
//! the monitor reports that server as active, inactive or closed, so a peer
//! always starts from a clean slate after a transition.

use crate::infrastructure::audit::{AuditEvent, log_audit};
use crate::infrastructure::config::{MeshSettings, SettingsStore};
use crate::mesh::metrics::RouteMetricsCollection;
use crate::mesh::monitor::{MeshMonitor, PeerObserver};
use crate::mesh::summary::{MeshServerRoutePerformance, MeshServerSummary, MeshSummary};
use crate::mesh::types::{MeshServerBroadcastData, MeshServerRoutingEntry};
use crate::modules::{ProcessStateChange, ProcessStatusTable};
use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A boolean mesh setting that can be flipped at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshSwitch {
    /// Master switch.
    Enable,
    /// UDP heartbeats.
    EnableBroadcast,
    /// Listening and known-server pings.
    EnableMonitoring,
    /// Forwarding local requests to peers.
    AllowForwarding,
    /// Serving requests forwarded by peers.
    AcceptForwarded,
}

impl MeshSwitch {
    /// Settings key reported in audit events.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Enable => "mesh.enable",
            Self::EnableBroadcast => "mesh.enable_status_broadcast",
            Self::EnableMonitoring => "mesh.enable_status_monitoring",
            Self::AllowForwarding => "mesh.allow_request_forwarding",
            Self::AcceptForwarded => "mesh.accept_forwarded_requests",
        }
    }

    /// Whether changing the switch restarts the monitor.
    #[must_use]
    pub fn forces_restart(self) -> bool {
        matches!(
            self,
            Self::Enable | Self::EnableBroadcast | Self::EnableMonitoring
        )
    }

    fn flag_mut(self, settings: &mut MeshSettings) -> &mut bool {
        match self {
            Self::Enable => &mut settings.enable,
            Self::EnableBroadcast => &mut settings.enable_status_broadcast,
            Self::EnableMonitoring => &mut settings.enable_status_monitoring,
            Self::AllowForwarding => &mut settings.allow_request_forwarding,
            Self::AcceptForwarded => &mut settings.accept_forwarded_requests,
        }
    }
}

impl FromStr for MeshSwitch {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "enable" => Ok(Self::Enable),
            "enablebroadcast" => Ok(Self::EnableBroadcast),
            "enablemonitoring" => Ok(Self::EnableMonitoring),
            "allowforwarding" => Ok(Self::AllowForwarding),
            "acceptforwarded" => Ok(Self::AcceptForwarded),
            _ => Err(format!("Unknown mesh setting '{name}'")),
        }
    }
}

impl fmt::Display for MeshSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Route metrics of every server, keyed by lowercased callable hostname.
#[derive(Debug, Default)]
struct ServerMetrics {
    servers: DashMap<String, RouteMetricsCollection>,
}

impl ServerMetrics {
    fn key(entry: &MeshServerRoutingEntry) -> String {
        entry.callable_hostname.to_lowercase()
    }

    fn effective_response_time(&self, entry: &MeshServerRoutingEntry, route: &str) -> f64 {
        self.servers
            .get(&Self::key(entry))
            .map_or(0.0, |c| c.effective_response_time(route))
    }

    fn record(&self, entry: &MeshServerRoutingEntry, route: &str, response_ms: u64, now: Instant) {
        self.servers
            .entry(Self::key(entry))
            .or_default()
            .route_mut(route)
            .record_request_at(response_ms, now);
    }

    fn reset(&self, entry: &MeshServerRoutingEntry) {
        if self.servers.remove(&Self::key(entry)).is_some() {
            debug!(server = %entry.callable_hostname, "Route metrics reset");
        }
    }
}

impl PeerObserver for ServerMetrics {
    fn on_active(&self, entry: &MeshServerRoutingEntry) {
        self.reset(entry);
    }

    fn on_inactive(&self, entry: &MeshServerRoutingEntry) {
        self.reset(entry);
    }

    fn on_close(&self, entry: &MeshServerRoutingEntry) {
        self.reset(entry);
    }
}

#[derive(Default)]
struct Background {
    token: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Server selection, metrics bookkeeping and settings changes for the mesh.
pub struct MeshManager {
    monitor: MeshMonitor,
    metrics: Arc<ServerMetrics>,
    store: Arc<dyn SettingsStore>,
    processes: Arc<ProcessStatusTable>,
    background: tokio::sync::Mutex<Background>,
    settings_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for MeshManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshManager")
            .field("monitor", &self.monitor)
            .field("servers_with_metrics", &self.metrics.servers.len())
            .finish_non_exhaustive()
    }
}

impl MeshManager {
    /// Wraps `monitor` and subscribes to its peer transitions.
    #[must_use]
    pub fn new(
        monitor: MeshMonitor,
        store: Arc<dyn SettingsStore>,
        processes: Arc<ProcessStatusTable>,
    ) -> Self {
        let metrics = Arc::new(ServerMetrics::default());
        monitor.add_observer(metrics.clone());
        Self {
            monitor,
            metrics,
            store,
            processes,
            background: tokio::sync::Mutex::new(Background::default()),
            settings_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Underlying monitor.
    #[must_use]
    pub fn monitor(&self) -> &MeshMonitor {
        &self.monitor
    }

    /// Mesh is on with broadcast or monitoring.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.monitor.is_enabled()
    }

    /// Requests forwarded by peers may be processed here.
    #[must_use]
    pub fn accept_forwarded_requests(&self) -> bool {
        let settings = self.monitor.settings();
        settings.enable && settings.accept_forwarded_requests
    }

    /// Local requests may be forwarded to peers.
    #[must_use]
    pub fn allow_request_forwarding(&self) -> bool {
        let settings = self.monitor.settings();
        settings.enable && settings.allow_request_forwarding
    }

    /// Starts the monitor, the metrics decay loop and the module state listener.
    ///
    /// A monitor that cannot start leaves the node serving local requests only.
    pub async fn start(&self) {
        if let Err(e) = self.monitor.start().await {
            error!(error = %e, "Mesh unavailable, serving local requests only");
        }

        let mut background = self.background.lock().await;
        if background.token.is_some() {
            return;
        }
        let token = CancellationToken::new();
        background.tasks.push(tokio::spawn(decay_loop(
            self.monitor.clone(),
            Arc::clone(&self.metrics),
            token.clone(),
        )));
        background.tasks.push(tokio::spawn(module_state_loop(
            self.monitor.clone(),
            self.processes.subscribe(),
            token.clone(),
        )));
        background.token = Some(token);
    }

    /// Stops the background loops and the monitor.
    pub async fn shutdown(&self) {
        {
            let mut background = self.background.lock().await;
            if let Some(token) = background.token.take() {
                token.cancel();
            }
            for task in background.tasks.drain(..) {
                if let Err(e) = task.await {
                    warn!(error = %e, "Mesh manager task ended abnormally");
                }
            }
        }
        self.monitor.stop().await;
    }

    /// Picks the server that should handle `path_suffix` (e.g. `vision/custom/model`).
    ///
    /// Returns `None` when the mesh is off or no active server advertises a
    /// matching route. A local entry in the result means: process here.
    #[must_use]
    pub fn select_server(&self, path_suffix: &str) -> Option<MeshServerRoutingEntry> {
        if !self.monitor.is_enabled() || !self.monitor.is_running() {
            return None;
        }
        self.select_from(&self.monitor.discovered_servers(), path_suffix)
    }

    fn select_from(
        &self,
        servers: &[MeshServerRoutingEntry],
        path_suffix: &str,
    ) -> Option<MeshServerRoutingEntry> {
        let route = route_for_path(servers, path_suffix)?;

        let candidates: Vec<(&MeshServerRoutingEntry, f64)> = servers
            .iter()
            .filter(|s| s.is_active && s.status.serves_route(&route))
            .map(|s| (s, self.metrics.effective_response_time(s, &route)))
            .collect();

        let fastest = candidates
            .iter()
            .map(|(_, ert)| *ert)
            .min_by(f64::total_cmp)?;
        let group: Vec<&MeshServerRoutingEntry> = candidates
            .iter()
            .filter(|(_, ert)| ert.total_cmp(&fastest).is_eq())
            .map(|(server, _)| *server)
            .collect();

        let chosen = group
            .iter()
            .find(|s| s.is_local)
            .or_else(|| group.first())?;
        debug!(route = %route, server = %chosen.callable_hostname, ert = fastest, "Mesh server selected");
        Some(MeshServerRoutingEntry::clone(chosen))
    }

    /// Records a round trip for `path_suffix` on `server`, or on this node when `None`.
    pub fn add_response_time(
        &self,
        server: Option<&MeshServerRoutingEntry>,
        path_suffix: &str,
        response_ms: u64,
    ) {
        self.add_response_time_at(server, path_suffix, response_ms, Instant::now());
    }

    fn add_response_time_at(
        &self,
        server: Option<&MeshServerRoutingEntry>,
        path_suffix: &str,
        response_ms: u64,
        now: Instant,
    ) {
        let local;
        let server = match server {
            Some(server) => server,
            None => {
                let Some(entry) = self.monitor.local_server() else {
                    return;
                };
                local = entry;
                &local
            }
        };

        let servers = self.monitor.discovered_servers();
        let Some(route) = route_for_path(&servers, path_suffix) else {
            return;
        };
        self.metrics.record(server, &route, response_ms, now);
    }

    /// Drops all metrics of `entry`.
    pub fn reset_metrics_for_server(&self, entry: &MeshServerRoutingEntry) {
        self.metrics.reset(entry);
    }

    /// Effective response time of `route` on `entry`.
    #[must_use]
    pub fn effective_response_time(&self, entry: &MeshServerRoutingEntry, route: &str) -> f64 {
        self.metrics.effective_response_time(entry, route)
    }

    /// Applies inactivity decay to every route of every server as of `now`.
    pub fn update_route_metrics_at(&self, now: Instant) {
        update_route_metrics(&self.monitor, &self.metrics, now);
    }

    /// Adds `hostname` to the known servers.
    pub fn register_server(&self, hostname: &str) -> bool {
        self.monitor.register_known_server(hostname)
    }

    /// This node's status as served to peers.
    #[must_use]
    pub fn broadcast_data(&self) -> MeshServerBroadcastData {
        self.monitor.current_status()
    }

    /// Route performance of every discovered server plus the text summary.
    #[must_use]
    pub fn mesh_summary(&self) -> MeshSummary {
        if !self.monitor.is_enabled() || !self.monitor.is_running() {
            return MeshSummary::new(Vec::new());
        }

        let servers = self
            .monitor
            .discovered_servers()
            .iter()
            .map(|server| {
                let metrics = self.metrics.servers.get(&ServerMetrics::key(server));
                let routes = server
                    .status
                    .enabled_routes
                    .iter()
                    .flatten()
                    .map(|route| {
                        let route_metrics = metrics.as_ref().and_then(|m| m.route(route));
                        MeshServerRoutePerformance {
                            route: route.clone(),
                            effective_response_time: route_metrics
                                .map_or(0.0, |m| m.effective_response_time()),
                            number_of_requests: route_metrics.map_or(0, |m| m.number_of_requests()),
                        }
                    })
                    .collect();
                MeshServerSummary::new(server, routes)
            })
            .collect();
        MeshSummary::new(servers)
    }

    /// Current mesh settings.
    #[must_use]
    pub fn settings(&self) -> MeshSettings {
        self.monitor.settings()
    }

    /// Turns the mesh on or off.
    pub async fn enable_mesh(&self, enable: bool) -> bool {
        self.set_switch(MeshSwitch::Enable, enable).await
    }

    /// Turns heartbeats on or off.
    pub async fn enable_broadcast(&self, enable: bool) -> bool {
        self.set_switch(MeshSwitch::EnableBroadcast, enable).await
    }

    /// Turns listening and pinging on or off.
    pub async fn enable_monitoring(&self, enable: bool) -> bool {
        self.set_switch(MeshSwitch::EnableMonitoring, enable).await
    }

    /// Allows or forbids forwarding local requests.
    pub async fn set_allow_request_forwarding(&self, allow: bool) -> bool {
        self.set_switch(MeshSwitch::AllowForwarding, allow).await
    }

    /// Allows or forbids serving forwarded requests.
    pub async fn set_accept_forwarded_requests(&self, accept: bool) -> bool {
        self.set_switch(MeshSwitch::AcceptForwarded, accept).await
    }

    /// Sets one switch, applies it to the monitor and persists the settings.
    ///
    /// Returns `false` when the settings could not be saved. Concurrent
    /// changes are applied one at a time so none is lost.
    pub async fn set_switch(&self, switch: MeshSwitch, value: bool) -> bool {
        let _guard = self.settings_lock.lock().await;
        let mut settings = self.monitor.settings();
        let old = std::mem::replace(switch.flag_mut(&mut settings), value);

        if let Err(e) = self
            .monitor
            .update_options(settings.clone(), switch.forces_restart())
            .await
        {
            warn!(setting = %switch, error = %e, "Mesh monitor did not restart cleanly");
        }

        log_audit(&AuditEvent::ConfigChanged {
            key: switch.key().to_string(),
            old_val: old.to_string(),
            new_val: value.to_string(),
        });

        match self.store.save_mesh(&settings).await {
            Ok(()) => {
                info!(setting = %switch, value, "Mesh setting updated");
                true
            }
            Err(e) => {
                error!(setting = %switch, error = %e, "Failed to persist mesh settings");
                false
            }
        }
    }
}

/// Longest advertised route that prefixes `path_suffix`, case-insensitively.
fn route_for_path(servers: &[MeshServerRoutingEntry], path_suffix: &str) -> Option<String> {
    let path = path_suffix.trim_start_matches('/').to_lowercase();
    servers
        .iter()
        .flat_map(|s| s.status.enabled_routes.iter().flatten())
        .map(|route| route.to_lowercase())
        .filter(|route| !route.is_empty() && path.starts_with(route.as_str()))
        .max_by_key(String::len)
}

fn update_route_metrics(monitor: &MeshMonitor, metrics: &ServerMetrics, now: Instant) {
    let inactivity = monitor.settings().route_inactivity_timeout();
    for mut collection in metrics.servers.iter_mut() {
        collection.update_all_at(inactivity, now);
    }
}

async fn decay_loop(monitor: MeshMonitor, metrics: Arc<ServerMetrics>, token: CancellationToken) {
    loop {
        let interval = monitor.settings().update_timing_metrics_interval();
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        if monitor.is_running() {
            update_route_metrics(&monitor, &metrics, Instant::now());
        }
    }
}

async fn module_state_loop(
    monitor: MeshMonitor,
    mut changes: tokio::sync::broadcast::Receiver<ProcessStateChange>,
    token: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            () = token.cancelled() => break,
            change = changes.recv() => change,
        };
        match change {
            Ok(change) => {
                debug!(module_id = %change.module_id, status = ?change.status, "Advertising module change");
                monitor.send_heartbeat().await;
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Module state changes coalesced");
                monitor.send_heartbeat().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}
