//! Route table of the public API.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;

use crate::api::{mesh, proxy, queue};
use crate::host::GatewayState;

/// Largest accepted request body; images and audio are posted whole.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// API routes: worker queues, mesh management and the inference proxy.
///
/// Static prefixes win over the `/v1/{*path}` catch-all, so the queue and mesh
/// endpoints are never proxied.
pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/v1/queue/{name}",
            get(queue::dequeue).post(queue::set_response),
        )
        .route(
            "/v1/queue/updatemodulestatus/{module_id}",
            post(queue::update_module_status),
        )
        .route("/v1/server/mesh/setting", post(mesh::update_setting))
        .route("/v1/server/mesh/EnableBroadcast", post(mesh::enable_broadcast))
        .route("/v1/server/mesh/EnableMonitoring", post(mesh::enable_monitoring))
        .route("/v1/server/mesh/AllowForwarding", post(mesh::allow_forwarding))
        .route("/v1/server/mesh/AcceptForwarded", post(mesh::accept_forwarded))
        .route("/v1/server/mesh/register/{hostname}", post(mesh::register))
        .route("/v1/server/mesh/summary", get(mesh::summary))
        .route("/v1/server/mesh/status", get(mesh::status))
        .route("/v1/{*path}", post(proxy::proxy))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
