use serde::Serialize;
use tracing::{info, info_span};

/// Domain event for audit logging.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The gateway started.
    SystemStartup {
        /// Component that started.
        component: String,
    },
    /// The gateway is stopping.
    SystemShutdown {
        /// Why it is stopping.
        reason: String,
    },
    /// A setting changed at runtime.
    ConfigChanged {
        /// Setting key.
        key: String,
        /// Previous value.
        old_val: String,
        /// New value.
        new_val: String,
    },
    /// A peer joined the mesh.
    PeerJoined {
        /// Hostname the peer reports.
        hostname: String,
        /// Where it was heard from.
        address: String,
    },
    /// A peer left the mesh.
    PeerLeft {
        /// Hostname the peer reported.
        hostname: String,
    },
    /// A forwarded request was refused.
    ForwardRejected {
        /// Requested path.
        path: String,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Audit event");
}
