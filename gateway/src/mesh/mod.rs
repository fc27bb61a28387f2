//! Mesh coordination: peer discovery, health tracking and server selection.
//!
//! [`MeshMonitor`] speaks the UDP heartbeat protocol and pings known servers;
//! [`MeshManager`] layers routing policy and runtime settings on top of it.

pub mod broadcast;
pub mod error;
pub mod identity;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod protocol;
pub mod summary;
pub mod types;

pub use broadcast::{BroadcastBuilder, BroadcastContext, ModuleBroadcastBuilder};
pub use error::MeshError;
pub use identity::LocalIdentity;
pub use manager::{MeshManager, MeshSwitch};
pub use metrics::{RouteMetrics, RouteMetricsCollection};
pub use monitor::{MeshMonitor, PeerObserver};
pub use summary::{MeshServerRoutePerformance, MeshServerSummary, MeshSummary};
pub use types::{KnownMeshServerPingStatus, MeshServerBroadcastData, MeshServerRoutingEntry};
