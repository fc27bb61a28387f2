//! meshgate server binary.
//!
//! Loads the layered configuration, serves the HTTP API and joins the mesh
//! until Ctrl-C or SIGTERM.

use anyhow::Context;
use meshgate::host::GatewayState;
use meshgate::infrastructure::{
    audit::{self, AuditEvent},
    config::Settings,
    server,
    telemetry::TelemetryBuilder,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::load().context("Failed to load configuration")?;

    TelemetryBuilder::from_settings(&config.telemetry, env!("CARGO_PKG_VERSION"))
        .init()
        .context("Failed to initialize telemetry")?;

    info!("Meshgate Starting...");
    audit::log_audit(&AuditEvent::SystemStartup {
        component: "Gateway".into(),
    });

    let addr = config.bind_address().to_socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let port = listener.local_addr()?.port();

    let state = Arc::new(GatewayState::new(config, port)?);
    state.start().await;

    let result = server::run_server(listener, Arc::clone(&state), shutdown_signal()).await;
    if let Err(e) = &result {
        error!("Gateway server failed: {e:?}");
    }

    info!("Shutdown signal received, cleaning up...");
    state.shutdown().await;
    audit::log_audit(&AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });

    info!("Meshgate Shutdown Complete.");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
