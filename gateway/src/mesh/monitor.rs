//! Peer discovery and health tracking.
//!
//! The monitor owns one UDP socket. It broadcasts this node's status as a
//! HEARTBEAT, listens for the heartbeats of others, pings statically known
//! servers over HTTP for networks where broadcast does not reach, and marks
//! peers inactive when they go quiet.
//!
//! Peer lifecycle: first contact makes a peer active, silence longer than the
//! inactivity timeout makes it inactive, any later contact reactivates it and
//! a GOODBYE removes it. Every transition is reported to the registered
//! [`PeerObserver`]s.

use crate::infrastructure::audit::{AuditEvent, log_audit};
use crate::infrastructure::config::MeshSettings;
use crate::mesh::broadcast::{BroadcastBuilder, BroadcastContext};
use crate::mesh::error::MeshError;
use crate::mesh::identity::{LocalIdentity, peer_url};
use crate::mesh::protocol::{self, MessageKind, ProtocolError};
use crate::mesh::types::{
    KnownMeshServerPingStatus, MeshServerBroadcastData, MeshServerRoutingEntry,
    UNRESPONSIVE_DESCRIPTION,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const MAX_DATAGRAM: usize = 65_507;

/// Receives peer lifecycle transitions.
///
/// Called synchronously from the monitor's loops; implementations must not block.
pub trait PeerObserver: Send + Sync {
    /// A peer became active.
    fn on_active(&self, _entry: &MeshServerRoutingEntry) {}
    /// A peer went quiet.
    fn on_inactive(&self, _entry: &MeshServerRoutingEntry) {}
    /// A peer said goodbye and was removed.
    fn on_close(&self, _entry: &MeshServerRoutingEntry) {}
}

#[derive(Debug, Clone, Copy)]
enum PeerEvent {
    Active,
    Inactive,
    Close,
}

struct ContactOutcome {
    entry: MeshServerRoutingEntry,
    is_new: bool,
    activated: bool,
}

#[derive(Default)]
struct Lifecycle {
    token: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

struct MonitorInner {
    identity: LocalIdentity,
    settings: RwLock<MeshSettings>,
    discovered: DashMap<String, MeshServerRoutingEntry>,
    known: RwLock<Vec<KnownMeshServerPingStatus>>,
    client: reqwest::Client,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    builder: Arc<dyn BroadcastBuilder>,
    observers: RwLock<Vec<Arc<dyn PeerObserver>>>,
}

/// UDP/HTTP mesh monitor. Cheap to clone.
#[derive(Clone)]
pub struct MeshMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for MeshMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshMonitor")
            .field("hostname", &self.inner.identity.hostname())
            .field("running", &self.is_running())
            .field("discovered", &self.inner.discovered.len())
            .finish_non_exhaustive()
    }
}

impl MeshMonitor {
    /// Creates a stopped monitor. Known servers from `settings` are registered.
    #[must_use]
    pub fn new(
        settings: MeshSettings,
        identity: LocalIdentity,
        builder: Arc<dyn BroadcastBuilder>,
        client: reqwest::Client,
    ) -> Self {
        let known_hostnames = settings.known_mesh_hostnames.clone();
        let monitor = Self {
            inner: Arc::new(MonitorInner {
                identity,
                settings: RwLock::new(settings),
                discovered: DashMap::new(),
                known: RwLock::new(Vec::new()),
                client,
                socket: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
                builder,
                observers: RwLock::new(Vec::new()),
            }),
        };
        for hostname in &known_hostnames {
            monitor.register_known_server(hostname);
        }
        monitor
    }

    /// Registers an observer for peer transitions.
    pub fn add_observer(&self, observer: Arc<dyn PeerObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Local identity.
    #[must_use]
    pub fn identity(&self) -> &LocalIdentity {
        &self.inner.identity
    }

    /// Local hostname.
    #[must_use]
    pub fn local_hostname(&self) -> &str {
        self.inner.identity.hostname()
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> MeshSettings {
        self.inner.settings.read().clone()
    }

    /// Mesh is enabled with broadcast or monitoring on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.settings.read().is_enabled()
    }

    /// The UDP socket is bound and the loops are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.socket.read().is_some()
    }

    /// Address the UDP socket is bound to.
    #[must_use]
    pub fn local_udp_addr(&self) -> Option<SocketAddr> {
        self.inner
            .socket
            .read()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Binds the socket and starts the loops.
    ///
    /// Does nothing when the mesh is disabled or already running.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::PortInUse`] or [`MeshError::Socket`] when the UDP
    /// socket cannot be set up; the node then keeps working without the mesh.
    pub async fn start(&self) -> Result<(), MeshError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.token.is_some() {
            return Ok(());
        }

        let settings = self.settings();
        if !settings.is_enabled() {
            debug!("Mesh disabled, monitor not started");
            return Ok(());
        }

        let socket = match bind_broadcast_socket(settings.port).await {
            Ok(socket) => Arc::new(socket),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                error!(port = settings.port, "Unable to start mesh monitoring, UDP port already in use");
                return Err(MeshError::PortInUse {
                    port: settings.port,
                });
            }
            Err(e) => {
                error!(port = settings.port, error = %e, "Unable to start mesh monitoring");
                return Err(e.into());
            }
        };
        *self.inner.socket.write() = Some(Arc::clone(&socket));

        let token = CancellationToken::new();
        if settings.enable_status_broadcast {
            info!("Starting mesh broadcasting");
            lifecycle
                .tasks
                .push(tokio::spawn(self.clone().heartbeat_loop(token.clone())));
        }
        if settings.enable_status_monitoring {
            info!("Starting mesh monitoring and known server pinging");
            lifecycle
                .tasks
                .push(tokio::spawn(self.clone().listen_loop(socket, token.clone())));
            lifecycle
                .tasks
                .push(tokio::spawn(self.clone().ping_loop(token.clone())));
            lifecycle
                .tasks
                .push(tokio::spawn(self.clone().sweep_loop(token.clone())));
        }
        lifecycle.token = Some(token);

        self.refresh_local_entry(Instant::now());
        Ok(())
    }

    /// Stops the loops, says GOODBYE and releases the socket.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(token) = lifecycle.token.take() else {
            return;
        };

        token.cancel();
        for task in lifecycle.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Mesh task ended abnormally");
            }
        }

        let status = self.current_status();
        if let Err(e) = self.broadcast(MessageKind::Goodbye, &status).await {
            debug!(error = %e, "GOODBYE not sent");
        }

        *self.inner.socket.write() = None;
        info!("Mesh monitoring stopped");
    }

    /// Stops, then starts again if still enabled.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub async fn restart(&self) -> Result<(), MeshError> {
        self.stop().await;
        self.start().await
    }

    /// Applies new settings, restarting when the switches changed or when forced.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub async fn update_options(
        &self,
        settings: MeshSettings,
        force_restart: bool,
    ) -> Result<(), MeshError> {
        let old = std::mem::replace(&mut *self.inner.settings.write(), settings.clone());
        for hostname in &settings.known_mesh_hostnames {
            self.register_known_server(hostname);
        }

        let running = self.is_running();
        let toggled = (!running && settings.enable) || (running && !settings.enable);
        let result = if force_restart || toggled || old.requires_restart(&settings) {
            self.restart().await
        } else {
            Ok(())
        };

        self.send_heartbeat().await;
        result
    }

    /// Builds this node's status from the current state.
    #[must_use]
    pub fn current_status(&self) -> MeshServerBroadcastData {
        let hostname = self.local_hostname();
        let mut known_hostnames: Vec<String> = self
            .inner
            .discovered
            .iter()
            .filter(|e| !e.is_local && !e.status.hostname.eq_ignore_ascii_case(hostname))
            .map(|e| e.status.hostname.clone())
            .collect();
        known_hostnames.sort();

        let settings = self.inner.settings.read().clone();
        self.inner.builder.build(&BroadcastContext {
            hostname,
            known_hostnames,
            settings: &settings,
        })
    }

    /// Broadcasts a HEARTBEAT and refreshes the local entry.
    ///
    /// Does nothing unless the mesh is enabled and running.
    pub async fn send_heartbeat(&self) {
        if !self.is_enabled() || !self.is_running() {
            return;
        }

        let status = self.refresh_local_entry(Instant::now());
        if !self.inner.settings.read().enable_status_broadcast {
            return;
        }
        if let Err(e) = self.broadcast(MessageKind::Heartbeat, &status).await {
            debug!(error = %e, "HEARTBEAT not sent");
        }
    }

    async fn broadcast(
        &self,
        kind: MessageKind,
        status: &MeshServerBroadcastData,
    ) -> Result<(), MeshError> {
        let Some(socket) = self.inner.socket.read().clone() else {
            return Ok(());
        };
        let (service_name, port) = {
            let settings = self.inner.settings.read();
            (settings.service_name.clone(), settings.port)
        };

        let bytes = protocol::encode(&service_name, kind, status)?;
        socket
            .send_to(&bytes, SocketAddr::from((Ipv4Addr::BROADCAST, port)))
            .await?;
        trace!(%kind, "Mesh message broadcast");
        Ok(())
    }

    /// Upserts this node's own entry from a fresh status and returns that status.
    fn refresh_local_entry(&self, now: Instant) -> MeshServerBroadcastData {
        let status = self.current_status();
        let identity = &self.inner.identity;
        let callable = if status.is_docker() {
            identity.primary_ip().to_string()
        } else {
            identity.hostname().to_owned()
        };

        let outcome = self.record_contact(
            &identity.hostname().to_lowercase(),
            &callable,
            Some(identity.primary_ip()),
            true,
            status.clone(),
            now,
        );
        if outcome.activated {
            self.notify(PeerEvent::Active, &outcome.entry);
        }
        status
    }

    fn record_contact(
        &self,
        key: &str,
        callable_hostname: &str,
        endpoint_ip: Option<IpAddr>,
        is_local: bool,
        status: MeshServerBroadcastData,
        now: Instant,
    ) -> ContactOutcome {
        let mut is_new = false;
        let mut entry = self
            .inner
            .discovered
            .entry(key.to_owned())
            .or_insert_with(|| {
                is_new = true;
                MeshServerRoutingEntry::new(
                    callable_hostname,
                    endpoint_ip,
                    is_local,
                    status.clone(),
                    now,
                )
            });

        entry.last_contact = now;
        entry.status = status;
        if endpoint_ip.is_some() {
            entry.endpoint_ip = endpoint_ip;
        }
        let activated = !entry.is_active;
        entry.is_active = true;

        ContactOutcome {
            entry: entry.clone(),
            is_new,
            activated,
        }
    }

    fn notify(&self, event: PeerEvent, entry: &MeshServerRoutingEntry) {
        match event {
            PeerEvent::Active => info!(server = %entry, "Mesh server active"),
            PeerEvent::Inactive => info!(server = %entry, "Mesh server inactive"),
            PeerEvent::Close => info!(server = %entry, "Mesh server left"),
        }

        let observers = self.inner.observers.read().clone();
        for observer in observers {
            match event {
                PeerEvent::Active => observer.on_active(entry),
                PeerEvent::Inactive => observer.on_inactive(entry),
                PeerEvent::Close => observer.on_close(entry),
            }
        }
    }

    /// Processes one received datagram.
    ///
    /// Returns the peer entry after a HEARTBEAT from another node, so the
    /// caller can tell that peer about us if needed.
    pub fn handle_datagram(
        &self,
        bytes: &[u8],
        sender: IpAddr,
        now: Instant,
    ) -> Option<MeshServerRoutingEntry> {
        let service_name = self.inner.settings.read().service_name.clone();
        let message = match protocol::decode(bytes, &service_name) {
            Ok(message) => message,
            Err(ProtocolError::NotForUs(service)) => {
                trace!(%sender, %service, "Datagram for another service");
                return None;
            }
            Err(e) => {
                debug!(%sender, error = %e, "Dropping mesh datagram");
                return None;
            }
        };

        let identity = &self.inner.identity;
        let is_local = identity.is_self(sender, &message.status.hostname);
        let endpoint = if is_local { identity.primary_ip() } else { sender };
        let key = message.status.hostname.to_lowercase();

        match message.kind {
            MessageKind::Heartbeat => {
                let callable = if message.status.is_docker() {
                    endpoint.to_string()
                } else {
                    message.status.hostname.clone()
                };

                let outcome =
                    self.record_contact(&key, &callable, Some(endpoint), is_local, message.status, now);
                if outcome.is_new {
                    self.unregister_known_server(&outcome.entry.callable_hostname);
                    if !is_local {
                        log_audit(&AuditEvent::PeerJoined {
                            hostname: outcome.entry.status.hostname.clone(),
                            address: endpoint.to_string(),
                        });
                    }
                }
                if outcome.activated {
                    self.notify(PeerEvent::Active, &outcome.entry);
                }
                (!is_local).then_some(outcome.entry)
            }
            MessageKind::Goodbye => {
                if let Some((_, entry)) = self.inner.discovered.remove(&key) {
                    log_audit(&AuditEvent::PeerLeft {
                        hostname: entry.status.hostname.clone(),
                    });
                    self.notify(PeerEvent::Close, &entry);
                }
                None
            }
        }
    }

    /// Tells a peer about this node when its status does not list us.
    ///
    /// Returns `true` when nothing needed doing or the peer accepted.
    pub async fn ping_back_if_needed(&self, entry: &MeshServerRoutingEntry) -> bool {
        let hostname = self.local_hostname();
        if entry.is_local || entry.status.knows_hostname(hostname) {
            return true;
        }

        let url = peer_url(
            &entry.callable_hostname,
            self.inner.identity.http_port(),
            &format!("v1/server/mesh/register/{hostname}"),
        );
        let timeout = self.inner.settings.read().ping_timeout();
        match self.inner.client.post(&url).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(server = %entry, "Registered with mesh server");
                true
            }
            Ok(response) => {
                debug!(server = %entry, status = %response.status(), "Mesh server refused registration");
                false
            }
            Err(e) => {
                debug!(server = %entry, error = %e, "Unable to register with mesh server");
                false
            }
        }
    }

    /// Pings every eligible known server once.
    pub async fn ping_known_servers(&self) {
        let recovery = self.inner.settings.read().ping_error_recovery_timeout();
        let now = Instant::now();
        let targets: Vec<String> = self
            .inner
            .known
            .read()
            .iter()
            .filter(|k| !k.is_loopback && !k.hostname.trim().is_empty())
            .filter(|k| !k.in_backoff(recovery, now))
            .map(|k| k.hostname.clone())
            .collect();

        for host in targets {
            self.ping_known_server(&host).await;
        }
    }

    async fn ping_known_server(&self, host: &str) {
        let url = peer_url(host, self.inner.identity.http_port(), "v1/server/mesh/status");
        let timeout = self.inner.settings.read().ping_timeout();
        let started = Instant::now();

        let outcome = match self.inner.client.get(&url).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<MeshServerBroadcastData>()
                .await
                .map_err(|_| 500),
            Ok(response) => Err(response.status().as_u16()),
            Err(e) => Err(e.status().map_or(503, |s| s.as_u16())),
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let now = Instant::now();
        let host_key = host.to_lowercase();

        match outcome {
            Ok(status) => {
                self.update_known(host, |known| {
                    known.last_status_code = Some(200);
                    known.last_error = None;
                    known.response_ms = elapsed_ms;
                });

                let key = if status.hostname.trim().is_empty() {
                    host_key.clone()
                } else {
                    status.hostname.to_lowercase()
                };
                if key != host_key {
                    self.inner.discovered.remove_if(&host_key, |_, e| {
                        e.status.system_description == UNRESPONSIVE_DESCRIPTION
                    });
                }

                let outcome = self.record_contact(&key, host, None, false, status, now);
                if outcome.is_new {
                    log_audit(&AuditEvent::PeerJoined {
                        hostname: outcome.entry.status.hostname.clone(),
                        address: host.to_owned(),
                    });
                }
                if outcome.activated {
                    self.notify(PeerEvent::Active, &outcome.entry);
                }
                self.ping_back_if_needed(&outcome.entry).await;
            }
            Err(code) => {
                self.update_known(host, |known| {
                    known.last_status_code = Some(code);
                    known.last_error = Some(now);
                });
                warn!(server = %host, code, "Unable to ping mesh server, pausing pings temporarily");

                let placeholder = MeshServerBroadcastData::unresponsive(host, code);
                self.inner
                    .discovered
                    .entry(host_key)
                    .and_modify(|entry| entry.status = placeholder.clone())
                    .or_insert_with(|| {
                        MeshServerRoutingEntry::new(host, None, false, placeholder, now)
                    });
            }
        }
    }

    fn update_known(&self, host: &str, update: impl FnOnce(&mut KnownMeshServerPingStatus)) {
        if let Some(known) = self
            .inner
            .known
            .write()
            .iter_mut()
            .find(|k| k.hostname.eq_ignore_ascii_case(host))
        {
            update(known);
        }
    }

    /// Marks peers silent for longer than the inactivity timeout as inactive.
    ///
    /// Returns the entries that changed.
    pub fn sweep_inactive_at(&self, now: Instant) -> Vec<MeshServerRoutingEntry> {
        let timeout = self.inner.settings.read().heartbeat_inactive_timeout();
        let mut lapsed = Vec::new();
        for mut entry in self.inner.discovered.iter_mut() {
            if entry.is_active && entry.idle_for(now) > timeout {
                entry.is_active = false;
                lapsed.push(entry.clone());
            }
        }

        for entry in &lapsed {
            self.notify(PeerEvent::Inactive, entry);
        }
        lapsed
    }

    /// Adds a known server (`host` or `host:port`). Idempotent and case-insensitive.
    pub fn register_known_server(&self, hostname: &str) -> bool {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return false;
        }
        if self.is_known_server(hostname) {
            return true;
        }

        let is_loopback = self.inner.identity.is_loopback_host(hostname);
        self.inner
            .known
            .write()
            .push(KnownMeshServerPingStatus::new(hostname, is_loopback));
        debug!(server = %hostname, is_loopback, "Known mesh server registered");
        true
    }

    /// Removes a known server. Returns `false` if it was not registered.
    pub fn unregister_known_server(&self, hostname: &str) -> bool {
        let mut known = self.inner.known.write();
        let before = known.len();
        known.retain(|k| !k.hostname.eq_ignore_ascii_case(hostname));
        before != known.len()
    }

    /// Returns `true` if `hostname` is a known server.
    #[must_use]
    pub fn is_known_server(&self, hostname: &str) -> bool {
        self.inner
            .known
            .read()
            .iter()
            .any(|k| k.hostname.eq_ignore_ascii_case(hostname))
    }

    /// Snapshot of the known server list.
    #[must_use]
    pub fn known_servers(&self) -> Vec<KnownMeshServerPingStatus> {
        self.inner.known.read().clone()
    }

    /// Snapshot of all discovered servers, local first, then by hostname.
    #[must_use]
    pub fn discovered_servers(&self) -> Vec<MeshServerRoutingEntry> {
        let mut servers: Vec<MeshServerRoutingEntry> =
            self.inner.discovered.iter().map(|e| e.value().clone()).collect();
        servers.sort_by(|a, b| {
            b.is_local
                .cmp(&a.is_local)
                .then_with(|| a.status.hostname.cmp(&b.status.hostname))
        });
        servers
    }

    /// This node's own entry, once seeded.
    #[must_use]
    pub fn local_server(&self) -> Option<MeshServerRoutingEntry> {
        self.inner
            .discovered
            .iter()
            .find(|e| e.is_local)
            .map(|e| e.value().clone())
    }

    async fn heartbeat_loop(self, token: CancellationToken) {
        loop {
            self.send_heartbeat().await;
            let interval = self.inner.settings.read().heartbeat_interval();
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn listen_loop(self, socket: Arc<UdpSocket>, token: CancellationToken) {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                () = token.cancelled() => break,
                received = socket.recv_from(&mut buffer) => received,
            };

            match received {
                Ok((len, from)) => {
                    if let Some(entry) = self.handle_datagram(&buffer[..len], from.ip(), Instant::now()) {
                        let monitor = self.clone();
                        tokio::spawn(async move {
                            monitor.ping_back_if_needed(&entry).await;
                        });
                    }
                }
                Err(e) => debug!(error = %e, "Mesh receive failed"),
            }
        }
    }

    async fn ping_loop(self, token: CancellationToken) {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = self.ping_known_servers() => {}
            }
            let interval = self.inner.settings.read().server_ping_interval();
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn sweep_loop(self, token: CancellationToken) {
        loop {
            let interval = self.inner.settings.read().heartbeat_interval();
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            let now = Instant::now();
            self.refresh_local_entry(now);
            self.sweep_inactive_at(now);
        }
    }
}

async fn bind_broadcast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}
