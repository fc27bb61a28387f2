//! Mesh error types.

use crate::mesh::protocol::ProtocolError;

/// Failures of the mesh monitor.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Another process holds the UDP port.
    #[error("UDP port {port} is already in use")]
    PortInUse {
        /// The configured port.
        port: u16,
    },
    /// Socket setup or I/O failed.
    #[error("mesh socket error: {0}")]
    Socket(#[from] std::io::Error),
    /// A datagram could not be built.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Talking to a peer over HTTP failed.
    #[error("peer request failed: {0}")]
    Http(#[from] reqwest::Error),
}
