//! The inference route: `POST /v1/{path}`.
//!
//! A request is either forwarded to the peer the mesh considers fastest for
//! its route or queued for a local module. Forward failures are charged to
//! the peer as a slow response so it drops out of contention until its
//! metrics decay, and the request falls back to local processing when this
//! node serves the route itself.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::api::envelope::{PROCESSED_LOCALLY, ResponseEnvelope};
use crate::api::error::ApiError;
use crate::api::form::InboundForm;
use crate::host::GatewayState;
use crate::infrastructure::audit::{AuditEvent, log_audit};
use crate::mesh::MeshServerRoutingEntry;
use crate::mesh::identity::peer_url;
use crate::modules::{RouteQueueInfo, extra_segments};
use crate::queue::RequestPayload;

/// Header marking a request forwarded by a peer.
pub const FORWARDED_HEADER: &str = "X-CPAI-Forwarded";

/// POST /v1/{path}
///
/// Runs an inference request locally or on a peer.
pub async fn proxy(
    State(state): State<Arc<GatewayState>>,
    Path(path_suffix): Path<String>,
    request: Request,
) -> Result<ResponseEnvelope, ApiError> {
    let is_forwarded = request
        .headers()
        .get(FORWARDED_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

    let mesh = state.mesh();
    if is_forwarded && !mesh.accept_forwarded_requests() {
        log_audit(&AuditEvent::ForwardRejected {
            path: path_suffix.clone(),
        });
        return Err(ApiError::ForwardedRequestRejected);
    }

    let query = request.uri().query().map(ToOwned::to_owned);
    let query_values = Query::<Vec<(String, String)>>::try_from_uri(request.uri())
        .map(|Query(values)| values)
        .unwrap_or_default();
    let form = InboundForm::read(request).await;

    let mut failed_forward = None;
    if !is_forwarded && mesh.allow_request_forwarding() {
        if let Some(server) = mesh.select_server(&path_suffix).filter(|s| !s.is_local) {
            match forward(&state, &server, &path_suffix, query.as_deref(), &form).await {
                Ok(envelope) => {
                    record_request(&path_suffix, "remote", envelope.analysis_round_trip_ms);
                    return Ok(envelope);
                }
                Err(envelope) => failed_forward = Some(envelope),
            }
        }
    }

    match state.route_map().lookup(&path_suffix, "POST") {
        Some(route) => {
            let envelope = dispatch_local(&state, &path_suffix, &route, query_values, &form).await;
            record_request(&path_suffix, "local", envelope.analysis_round_trip_ms);
            Ok(envelope)
        }
        None => {
            record_request(&path_suffix, "none", None);
            failed_forward.ok_or_else(|| ApiError::NotFound(format!("No route found for {path_suffix}")))
        }
    }
}

/// Sends the request to `server`.
///
/// `Err` carries the error envelope for a forward that produced no usable
/// response; the peer has already been charged the penalty.
async fn forward(
    state: &GatewayState,
    server: &MeshServerRoutingEntry,
    path_suffix: &str,
    query: Option<&str>,
    form: &InboundForm,
) -> Result<ResponseEnvelope, ResponseEnvelope> {
    let mesh = state.mesh();
    let hostname = server.status.hostname.clone();
    let penalty = state.settings().server.forward_penalty_ms;

    let mut url = peer_url(
        &server.forward_host(mesh.settings().route_via_hostname),
        mesh.monitor().identity().http_port(),
        &format!("v1/{path_suffix}"),
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    debug!(server = %server, url = %url, "Forwarding request");

    let started = Instant::now();
    let sent = state
        .forward_client()
        .post(&url)
        .header(FORWARDED_HEADER, "true")
        .multipart(form.to_multipart())
        .send()
        .await;

    let outcome = match sent {
        Ok(response) if response.status().is_success() => match response.json::<Value>().await {
            Ok(Value::Object(body)) => Ok(body),
            Ok(_) | Err(_) => Err(format!("Invalid response from {hostname}")),
        },
        Ok(response) => Err(format!(
            "Error forwarding request to {hostname} ({})",
            response.status()
        )),
        Err(e) if e.is_timeout() => Err(format!("Timed out forwarding request to {hostname}")),
        Err(_) => Err(format!("Exception when forwarding request to {hostname}")),
    };
    let elapsed = elapsed_ms(started);

    match outcome {
        Ok(body) => Ok(remote_envelope(state, server, path_suffix, body, elapsed)),
        Err(error) => {
            warn!(server = %server, error = %error, "Forwarding failed");
            metrics::counter!("meshgate_forward_failures_total").increment(1);
            mesh.add_response_time(Some(server), path_suffix, penalty);
            Err(ResponseEnvelope::error(StatusCode::INTERNAL_SERVER_ERROR, error)
                .with_round_trip(elapsed)
                .with_processed_by(hostname))
        }
    }
}

fn remote_envelope(
    state: &GatewayState,
    server: &MeshServerRoutingEntry,
    path_suffix: &str,
    body: Map<String, Value>,
    elapsed: u64,
) -> ResponseEnvelope {
    let envelope = ResponseEnvelope::module(body);

    // A peer that answered without success is as bad as a slow one.
    let recorded = if envelope.is_success() {
        elapsed
    } else {
        state.settings().server.forward_penalty_ms
    };
    state.mesh().add_response_time(Some(server), path_suffix, recorded);

    envelope
        .with_round_trip(elapsed)
        .with_processed_by(server.status.hostname.clone())
}

async fn dispatch_local(
    state: &GatewayState,
    path_suffix: &str,
    route: &RouteQueueInfo,
    query_values: Vec<(String, String)>,
    form: &InboundForm,
) -> ResponseEnvelope {
    let mut payload = RequestPayload::new(route.command.clone())
        .with_url_segments(extra_segments(path_suffix, &route.route));
    payload.extend_values(query_values);
    form.fill(&mut payload);

    let cancel = state.shutdown_token().child_token();
    let started = Instant::now();
    let result = state
        .dispatcher()
        .send_request_json(&route.queue_name, payload, &cancel)
        .await;
    let elapsed = elapsed_ms(started);

    match result {
        Ok(body) => {
            state.mesh().add_response_time(None, path_suffix, elapsed);
            note_module_activity(state, &body);
            ResponseEnvelope::module(body)
                .with_round_trip(elapsed)
                .with_processed_by(PROCESSED_LOCALLY)
        }
        Err(e) => ResponseEnvelope::error(e.status_code(), e.to_string())
            .with_round_trip(elapsed)
            .with_processed_by(PROCESSED_LOCALLY),
    }
}

fn note_module_activity(state: &GatewayState, body: &Map<String, Value>) {
    let Some(module_id) = body
        .get("moduleId")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
    else {
        return;
    };

    let processes = state.processes();
    processes.update_last_seen(module_id);
    if let Some(status_data @ Value::Object(_)) = body.get("statusData") {
        processes.update_status_data(module_id, status_data.clone());
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_request(path_suffix: &str, processed_by: &'static str, round_trip_ms: Option<u64>) {
    let route = path_suffix.split('/').take(2).collect::<Vec<_>>().join("/").to_lowercase();
    metrics::counter!("meshgate_requests_total", "route" => route, "processed_by" => processed_by)
        .increment(1);
    if let Some(ms) = round_trip_ms {
        metrics::histogram!("meshgate_round_trip_ms", "processed_by" => processed_by)
            .record(ms as f64);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
