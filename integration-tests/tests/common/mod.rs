//! Shared test utilities for integration tests.
//!
//! Boots real gateway nodes on ephemeral ports and simulates analysis
//! modules that long-poll for work.

#![allow(dead_code)]

use anyhow::{Context, Result};
use meshgate::host::GatewayState;
use meshgate::infrastructure::config::{
    JsonSettingsStore, MeshSettings, ModuleRouteSettings, ModuleSettings, Settings,
};
use meshgate::infrastructure::server;
use meshgate::mesh::LocalIdentity;
use serde_json::{Value, json};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Module id used by the simulated vision worker.
pub const VISION_MODULE: &str = "vision";
/// Queue served by the simulated vision worker.
pub const VISION_QUEUE: &str = "vision_queue";

/// A gateway node listening on `127.0.0.1`.
pub struct TestNode {
    /// Shared gateway state
    pub state: Arc<GatewayState>,
    /// Bound HTTP address
    pub addr: SocketAddr,
    /// Client for talking to the node
    pub client: reqwest::Client,
    /// Holds the settings overrides file
    pub temp_dir: TempDir,
    server: JoinHandle<Result<()>>,
}

impl TestNode {
    /// Starts a node named `hostname` with `settings`.
    pub async fn spawn(hostname: &str, mut settings: Settings) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        settings.settings_file = temp_dir.path().join("meshgate.settings.json");

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let identity = LocalIdentity::new(hostname, loopback, vec![loopback], addr.port());
        let store = Arc::new(JsonSettingsStore::new(settings.settings_file.clone()));

        let state = Arc::new(GatewayState::with_parts(settings, identity, store, None)?);
        state.start().await;

        let token = state.shutdown_token().clone();
        let server = tokio::spawn(server::run_server(listener, Arc::clone(&state), async move {
            token.cancelled().await;
        }));

        Ok(Self {
            state,
            addr,
            client: reqwest::Client::new(),
            temp_dir,
            server,
        })
    }

    /// Absolute URL of `path` on this node.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Posts an url-encoded form and returns the status and JSON body.
    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<(u16, Value)> {
        let response = self.client.post(self.url(path)).form(form).send().await?;
        let status = response.status().as_u16();
        let body = response.json().await.context("response is not JSON")?;
        Ok((status, body))
    }

    /// Fetches the mesh summary.
    pub async fn mesh_summary(&self) -> Result<Value> {
        let summary = self
            .client
            .get(self.url("v1/server/mesh/summary"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(summary)
    }

    /// Waits until the mesh summary lists an active server named `hostname`.
    pub async fn wait_for_peer(&self, hostname: &str) -> Result<Value> {
        for _ in 0..100 {
            let summary = self.mesh_summary().await?;
            if let Some(server) = find_server(&summary, hostname) {
                if server["isActive"] == true {
                    return Ok(server.clone());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("peer {hostname} never became active")
    }

    /// Stops the node and waits for the server to drain.
    pub async fn stop(self) -> Result<()> {
        self.state.shutdown().await;
        self.server.await??;
        Ok(())
    }
}

/// Entry for `hostname` in a serialized mesh summary.
pub fn find_server<'a>(summary: &'a Value, hostname: &str) -> Option<&'a Value> {
    summary["serverInfos"]
        .as_array()?
        .iter()
        .find(|s| s["hostname"].as_str().is_some_and(|h| h.eq_ignore_ascii_case(hostname)))
}

/// Performance entry of `route` on a summarized server.
pub fn route_info<'a>(server: &'a Value, route: &str) -> Option<&'a Value> {
    server["routeInfos"]
        .as_array()?
        .iter()
        .find(|r| r["route"] == route)
}

/// The vision module: `vision/detection` and `vision/custom` on `vision_queue`.
pub fn vision_module() -> ModuleSettings {
    let route = |route: &str, command: &str| ModuleRouteSettings {
        route: route.into(),
        method: "POST".into(),
        command: command.into(),
        mesh_enabled: true,
    };
    ModuleSettings {
        module_id: VISION_MODULE.into(),
        name: Some("Object Detection".into()),
        queue: VISION_QUEUE.into(),
        routes: vec![route("vision/detection", "detect"), route("vision/custom", "custom")],
    }
}

/// Settings for a standalone node: mesh off, short queue timeouts.
pub fn standalone_settings() -> Settings {
    let mut settings = Settings {
        mesh: MeshSettings {
            enable: false,
            ..MeshSettings::default()
        },
        modules: vec![vision_module()],
        ..Settings::default()
    };
    settings.queue.dequeue_timeout_ms = 500;
    settings.queue.response_timeout_ms = 5_000;
    settings
}

/// Settings for a node that pings `peers` directly and forwards to them.
///
/// Broadcasting stays off so tests never touch the LAN.
pub fn mesh_settings(peers: &[String]) -> Settings {
    let mut settings = standalone_settings();
    settings.mesh = MeshSettings {
        enable: true,
        enable_status_broadcast: false,
        enable_status_monitoring: true,
        known_mesh_hostnames: peers.to_vec(),
        port: 0,
        heartbeat_interval_ms: 100,
        ..MeshSettings::default()
    };
    settings.server.forward_timeout_ms = 300;
    settings
}

/// Status document a simulated peer serves at `/v1/server/mesh/status`.
pub fn peer_status(hostname: &str, routes: &[&str]) -> Value {
    json!({
        "hostname": hostname,
        "systemDescription": "Simulated peer",
        "platform": "Linux",
        "enabledRoutes": routes,
        "isBroadcasting": false,
        "isMonitoring": true,
        "acceptForwardedRequests": true,
        "allowRequestForwarding": true,
        "knownHostnames": [],
        "code": 200
    })
}

/// Simulated analysis module.
///
/// Long-polls `queue` as `module_id`, waits `delay`, then posts whatever
/// `respond` builds from the queued request.
pub fn spawn_worker<F>(node: &TestNode, queue: &str, module_id: &str, delay: Duration, respond: F) -> JoinHandle<()>
where
    F: Fn(&Value) -> Value + Send + 'static,
{
    let client = node.client.clone();
    let poll_url = format!("{}?moduleId={module_id}", node.url(&format!("v1/queue/{queue}")));
    let base = node.url("v1/queue");
    let module_id = module_id.to_owned();

    tokio::spawn(async move {
        loop {
            let Ok(response) = client.get(&poll_url).send().await else {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            };
            let Ok(Some(request)) = response.json::<Option<Value>>().await else {
                continue;
            };
            let Some(reqid) = request["reqid"].as_str() else {
                continue;
            };

            tokio::time::sleep(delay).await;
            let mut body = respond(&request);
            if let Some(map) = body.as_object_mut() {
                map.entry("moduleId").or_insert_with(|| json!(module_id));
                map.entry("command")
                    .or_insert_with(|| request["payload"]["command"].clone());
            }
            let _ = client
                .post(format!("{base}/{reqid}"))
                .body(body.to_string())
                .send()
                .await;
        }
    })
}
