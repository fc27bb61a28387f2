use crate::api;
use crate::host::GatewayState;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

async fn health_check() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<Arc<GatewayState>>) -> (StatusCode, &'static str) {
    if state.shutdown_token().is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down")
    } else {
        (StatusCode::OK, "OK")
    }
}

/// Process-wide Prometheus handle.
///
/// The recorder is installed on first use. When another recorder already owns
/// the global slot the handle renders an empty registry.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Failed to install Prometheus recorder: {e}");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Control plane plus the public API, bound to `state`.
pub fn app(state: Arc<GatewayState>) -> Router {
    let handle = prometheus_handle();

    let control_plane = Router::new()
        .route("/health/live", get(health_check))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(move || std::future::ready(handle.render())));

    control_plane.merge(api::routes()).with_state(state)
}

/// Serves the gateway on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<GatewayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    tracing::info!("Gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
