//! Worker endpoints: modules pull requests and post their responses here.

use axum::{
    Form,
    extract::{Path, Query, State, rejection::FormRejection},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::host::GatewayState;
use crate::queue::QueuedRequest;

/// Query of a worker's long-poll.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DequeueParams {
    /// Module polling.
    pub module_id: Option<String>,
    /// Execution provider the module runs on, e.g. `CUDA`.
    pub execution_provider: Option<String>,
    /// `true` when the module can use a GPU.
    #[serde(rename = "canUseGPU")]
    pub can_use_gpu: Option<String>,
}

/// Form of a module status update.
#[derive(Debug, Default, Deserialize)]
pub struct StatusUpdateForm {
    /// JSON status document.
    #[serde(rename = "statusData")]
    pub status_data: Option<String>,
}

/// GET /v1/queue/{name}
///
/// Long-polls `name` for the next request. Answers `null` when nothing arrived in time.
pub async fn dequeue(
    State(state): State<Arc<GatewayState>>,
    Path(queue_name): Path<String>,
    Query(params): Query<DequeueParams>,
) -> Json<Option<QueuedRequest>> {
    let processes = state.processes();
    let module_id = params
        .module_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    if let Some(module_id) = module_id {
        processes.update_last_seen(module_id);
        if let (Some(provider), Some(can_use_gpu)) =
            (params.execution_provider.as_deref(), params.can_use_gpu.as_deref())
        {
            processes.update_inference_device(
                module_id,
                provider,
                can_use_gpu.trim().eq_ignore_ascii_case("true"),
            );
        }
    }

    let cancel = state.shutdown_token().child_token();
    let timeout = state.settings().queue.dequeue_timeout();
    let request = tokio::time::timeout(timeout, state.queues().dequeue(&queue_name, &cancel))
        .await
        .ok()
        .flatten();

    if let (Some(request), Some(module_id)) = (&request, module_id) {
        if request.is_quit_for(module_id) {
            info!(module_id = %module_id, "Module asked to quit");
            processes.advise_shutdown(module_id);
        }
    }
    Json(request)
}

/// POST /v1/queue/{reqid}
///
/// Stores a module's response for the waiting client.
pub async fn set_response(
    State(state): State<Arc<GatewayState>>,
    Path(reqid): Path<String>,
    body: String,
) -> Result<&'static str, ApiError> {
    if let Ok(Value::Object(response)) = serde_json::from_str::<Value>(&body) {
        let module_id = response
            .get("moduleId")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty());
        if let Some(module_id) = module_id {
            let processes = state.processes();
            processes.update_last_seen(module_id);

            let command = response.get("command").and_then(Value::as_str).unwrap_or_default();
            if !command.eq_ignore_ascii_case("status") {
                processes.increment_processed(module_id);
            }
            if let Some(status_data) = response.get("statusData").filter(|v| !v.is_null()) {
                processes.update_status_data(module_id, status_data.clone());
            }
        }
    } else {
        debug!(reqid = %reqid, "Module response is not a JSON object");
    }

    if state.queues().set_result(&reqid, Some(body)) {
        Ok("Response saved.")
    } else {
        Err(ApiError::BadRequest("failure to set response.".into()))
    }
}

/// POST /v1/queue/updatemodulestatus/{moduleId}
///
/// Merges the posted `statusData` into the module's status.
pub async fn update_module_status(
    State(state): State<Arc<GatewayState>>,
    Path(module_id): Path<String>,
    form: Result<Form<StatusUpdateForm>, FormRejection>,
) -> (StatusCode, &'static str) {
    let status_data = form
        .ok()
        .and_then(|Form(form)| form.status_data)
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());

    let processes = state.processes();
    processes.update_last_seen(&module_id);
    let updated = status_data.is_some_and(|data| processes.update_status_data(&module_id, data));
    if updated {
        (StatusCode::OK, "Module status updated")
    } else {
        (StatusCode::NOT_FOUND, "Module status data not updated")
    }
}
