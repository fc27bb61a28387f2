//! Mesh management endpoints.

use axum::{
    Form, Json,
    extract::{Path, State, rejection::FormRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::host::GatewayState;
use crate::mesh::{MeshServerBroadcastData, MeshSummary, MeshSwitch};

/// Form of `POST /v1/server/mesh/setting`.
#[derive(Debug, Default, Deserialize)]
pub struct SettingForm {
    /// Switch name, e.g. `EnableBroadcast`.
    pub name: Option<String>,
    /// `true` or `false`.
    pub value: Option<String>,
}

/// Form of `EnableBroadcast` and `EnableMonitoring`.
#[derive(Debug, Default, Deserialize)]
pub struct StateForm {
    /// `true` or `false`.
    pub state: Option<String>,
}

/// Form of `AllowForwarding`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowForwardingForm {
    /// `true` or `false`.
    pub allow_forwarding: Option<String>,
}

/// Form of `AcceptForwarded`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptForwardedForm {
    /// `true` or `false`.
    pub accept_forwarded: Option<String>,
}

fn parse_bool(raw: Option<&str>) -> Result<bool, ApiError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ApiError::BadRequest(format!("'{raw}' is not a valid boolean value")))
    }
}

fn form_or_default<T: Default>(form: Result<Form<T>, FormRejection>) -> T {
    form.map(|Form(form)| form).unwrap_or_default()
}

async fn apply(state: &GatewayState, switch: MeshSwitch, value: bool) -> Result<Json<Value>, ApiError> {
    if state.mesh().set_switch(switch, value).await {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::BadRequest(format!("Unable to save setting {switch}")))
    }
}

/// POST /v1/server/mesh/setting
pub async fn update_setting(
    State(state): State<Arc<GatewayState>>,
    form: Result<Form<SettingForm>, FormRejection>,
) -> Result<Json<Value>, ApiError> {
    let form = form_or_default(form);
    let switch: MeshSwitch = form
        .name
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(ApiError::BadRequest)?;
    let value = parse_bool(form.value.as_deref())?;
    apply(&state, switch, value).await
}

/// POST /v1/server/mesh/EnableBroadcast
pub async fn enable_broadcast(
    State(state): State<Arc<GatewayState>>,
    form: Result<Form<StateForm>, FormRejection>,
) -> Result<Json<Value>, ApiError> {
    let value = parse_bool(form_or_default(form).state.as_deref())?;
    apply(&state, MeshSwitch::EnableBroadcast, value).await
}

/// POST /v1/server/mesh/EnableMonitoring
pub async fn enable_monitoring(
    State(state): State<Arc<GatewayState>>,
    form: Result<Form<StateForm>, FormRejection>,
) -> Result<Json<Value>, ApiError> {
    let value = parse_bool(form_or_default(form).state.as_deref())?;
    apply(&state, MeshSwitch::EnableMonitoring, value).await
}

/// POST /v1/server/mesh/AllowForwarding
pub async fn allow_forwarding(
    State(state): State<Arc<GatewayState>>,
    form: Result<Form<AllowForwardingForm>, FormRejection>,
) -> Result<Json<Value>, ApiError> {
    let value = parse_bool(form_or_default(form).allow_forwarding.as_deref())?;
    apply(&state, MeshSwitch::AllowForwarding, value).await
}

/// POST /v1/server/mesh/AcceptForwarded
pub async fn accept_forwarded(
    State(state): State<Arc<GatewayState>>,
    form: Result<Form<AcceptForwardedForm>, FormRejection>,
) -> Result<Json<Value>, ApiError> {
    let value = parse_bool(form_or_default(form).accept_forwarded.as_deref())?;
    apply(&state, MeshSwitch::AcceptForwarded, value).await
}

/// POST /v1/server/mesh/register/{hostname}
pub async fn register(
    State(state): State<Arc<GatewayState>>,
    Path(hostname): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.mesh().register_server(&hostname) {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::BadRequest("A hostname is required".into()))
    }
}

/// GET /v1/server/mesh/summary
pub async fn summary(State(state): State<Arc<GatewayState>>) -> Json<MeshSummary> {
    Json(state.mesh().mesh_summary())
}

/// GET /v1/server/mesh/status
///
/// Also answers peers' HTTP pings.
pub async fn status(State(state): State<Arc<GatewayState>>) -> Json<MeshServerBroadcastData> {
    Json(state.mesh().broadcast_data())
}
