//! Meshgate - a queue-backed inference gateway.
//!
//! Clients post inference requests over HTTP. Each request is either queued
//! for a local analysis module, which long-polls for work and posts the
//! result back, or forwarded to the peer that currently answers its route
//! fastest. Peers find each other through UDP heartbeats and HTTP pings.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// HTTP endpoints and the response envelope.
pub mod api;
/// Shared gateway state.
pub mod host;
/// Infrastructure components (config, server, telemetry, audit).
pub mod infrastructure;
/// Mesh discovery, metrics and routing.
pub mod mesh;
/// Analysis modules, their routes and process status.
pub mod modules;
/// Named request queues and the request/response correlation.
pub mod queue;
