//! Composition of the queue core, the module tables and the mesh.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::{JsonSettingsStore, Settings, SettingsStore};
use crate::mesh::{BroadcastBuilder, LocalIdentity, MeshManager, MeshMonitor, ModuleBroadcastBuilder};
use crate::modules::{BackendRouteMap, ProcessStatusTable};
use crate::queue::{CommandDispatcher, QueueService};

/// Inner state that can be cheaply cloned via Arc.
struct GatewayStateInner {
    settings: Settings,
    queues: Arc<QueueService>,
    dispatcher: CommandDispatcher,
    route_map: Arc<BackendRouteMap>,
    processes: Arc<ProcessStatusTable>,
    mesh: Arc<MeshManager>,
    forward_client: reqwest::Client,
    shutdown: CancellationToken,
}

/// Everything the HTTP handlers need.
///
/// Built once the HTTP listener is bound so the mesh knows the port peers
/// must call back on. Clones share the same state.
#[derive(Clone)]
pub struct GatewayState {
    inner: Arc<GatewayStateInner>,
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("mesh", &self.inner.mesh)
            .finish_non_exhaustive()
    }
}

impl GatewayState {
    /// Builds the state for a node serving HTTP on `http_port`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn new(settings: Settings, http_port: u16) -> Result<Self> {
        let identity = LocalIdentity::detect(settings.mesh.hostname.as_deref(), http_port);
        let store: Arc<dyn SettingsStore> =
            Arc::new(JsonSettingsStore::new(settings.settings_file.clone()));
        Self::with_parts(settings, identity, store, None)
    }

    /// Builds the state from explicit parts.
    ///
    /// `builder` replaces the status advertised to peers; `None` advertises
    /// the routes of running modules.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn with_parts(
        settings: Settings,
        identity: LocalIdentity,
        store: Arc<dyn SettingsStore>,
        builder: Option<Arc<dyn BroadcastBuilder>>,
    ) -> Result<Self> {
        let queues = Arc::new(QueueService::new());
        let dispatcher =
            CommandDispatcher::new(Arc::clone(&queues), settings.queue.response_timeout());
        let route_map = Arc::new(BackendRouteMap::from_modules(&settings.modules));
        let processes = Arc::new(ProcessStatusTable::from_modules(&settings.modules));

        for module in &settings.modules {
            queues.ensure_queue_exists(&module.queue);
        }

        let ping_client = reqwest::Client::builder()
            .build()
            .context("Failed to build mesh HTTP client")?;
        let forward_client = reqwest::Client::builder()
            .timeout(settings.server.forward_timeout())
            .build()
            .context("Failed to build forwarding HTTP client")?;

        let builder = builder
            .unwrap_or_else(|| Arc::new(ModuleBroadcastBuilder::new(Arc::clone(&processes))));
        let monitor = MeshMonitor::new(settings.mesh.clone(), identity, builder, ping_client);
        let mesh = Arc::new(MeshManager::new(monitor, store, Arc::clone(&processes)));

        Ok(Self {
            inner: Arc::new(GatewayStateInner {
                settings,
                queues,
                dispatcher,
                route_map,
                processes,
                mesh,
                forward_client,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Settings the node was started with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Named module queues.
    #[must_use]
    pub fn queues(&self) -> &Arc<QueueService> {
        &self.inner.queues
    }

    /// Request/response dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.inner.dispatcher
    }

    /// Route to queue mapping.
    #[must_use]
    pub fn route_map(&self) -> &Arc<BackendRouteMap> {
        &self.inner.route_map
    }

    /// Module status table.
    #[must_use]
    pub fn processes(&self) -> &Arc<ProcessStatusTable> {
        &self.inner.processes
    }

    /// Mesh policy layer.
    #[must_use]
    pub fn mesh(&self) -> &Arc<MeshManager> {
        &self.inner.mesh
    }

    /// Pooled client used to forward requests to peers.
    #[must_use]
    pub fn forward_client(&self) -> &reqwest::Client {
        &self.inner.forward_client
    }

    /// Root token; cancelled on shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Starts the mesh and the idle queue sweep.
    pub async fn start(&self) {
        tokio::spawn(Arc::clone(&self.inner.queues).run_idle_sweep(
            self.inner.settings.queue.idle_queue_timeout(),
            self.inner.shutdown.child_token(),
        ));
        self.inner.mesh.start().await;
    }

    /// Cancels in-flight waits and stops the mesh.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.mesh.shutdown().await;
    }
}
