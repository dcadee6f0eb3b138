//! OSB handlers.
//!
//! Each handler validates the boundary concerns (headers, query, body),
//! calls the engine and renders the OSB response for the outcome.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use stencil_broker::{
    BindRequest, DeprovisionResponse, Operation, ProvisionRequest, UnbindResponse,
};

use crate::ApiState;
use crate::error::ApiError;
use crate::headers::OsbHeaders;

type ApiResult = Result<Response, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(t)| t)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn require_async(accepts_incomplete: Option<bool>) -> Result<(), ApiError> {
    if accepts_incomplete == Some(true) {
        Ok(())
    } else {
        Err(ApiError::AsyncRequired)
    }
}

// ── Catalog ────────────────────────────────────────────────────

/// GET /v2/catalog
pub async fn catalog(State(state): State<ApiState>, _headers: OsbHeaders) -> ApiResult {
    let services = state.engine.catalog().catalog()?;
    Ok(Json(json!({ "services": services })).into_response())
}

// ── Provision / Deprovision ────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AsyncQuery {
    pub accepts_incomplete: Option<bool>,
}

/// Only the target namespace matters here; other context fields such as
/// `platform` are accepted and ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ProvisionContext {
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionBody {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub context: ProvisionContext,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// PUT /v2/service_instances/{instance_id}
pub async fn provision(
    State(state): State<ApiState>,
    headers: OsbHeaders,
    Path(instance_id): Path<String>,
    Query(query): Query<AsyncQuery>,
    payload: Result<Json<ProvisionBody>, JsonRejection>,
) -> ApiResult {
    require_async(query.accepts_incomplete)?;
    let req = body(payload)?;
    let request = ProvisionRequest {
        service_id: req.service_id,
        plan_id: req.plan_id,
        namespace: req.context.namespace,
        parameters: req.parameters,
    };

    let resp = state.engine.provision(&headers.actor, &instance_id, &request)?;
    Ok(match resp.operation {
        Some(operation) if resp.async_op => (
            StatusCode::ACCEPTED,
            Json(json!({ "operation": operation })),
        )
            .into_response(),
        _ => (StatusCode::OK, Json(json!({}))).into_response(),
    })
}

/// DELETE /v2/service_instances/{instance_id}
///
/// The instance record already names its template, so the `service_id`
/// and `plan_id` query parameters are not consulted.
pub async fn deprovision(
    State(state): State<ApiState>,
    headers: OsbHeaders,
    Path(instance_id): Path<String>,
    Query(query): Query<AsyncQuery>,
) -> ApiResult {
    require_async(query.accepts_incomplete)?;
    Ok(match state.engine.deprovision(&headers.actor, &instance_id)? {
        DeprovisionResponse::Accepted { operation } => (
            StatusCode::ACCEPTED,
            Json(json!({ "operation": operation })),
        )
            .into_response(),
        DeprovisionResponse::Gone => (StatusCode::GONE, Json(json!({}))).into_response(),
    })
}

// ── Last operation ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LastOperationQuery {
    pub operation: Option<String>,
}

/// GET /v2/service_instances/{instance_id}/last_operation
pub async fn last_operation(
    State(state): State<ApiState>,
    headers: OsbHeaders,
    Path(instance_id): Path<String>,
    Query(query): Query<LastOperationQuery>,
) -> ApiResult {
    let operation = match query.operation.as_deref() {
        None | Some("") => Operation::Provisioning,
        Some(op) => op.parse::<Operation>()?,
    };
    let resp = state
        .engine
        .last_operation(&headers.actor, &instance_id, operation)?;

    let mut out = json!({ "state": resp.state });
    if let Some(description) = resp.description {
        out["description"] = Value::String(description);
    }
    Ok(Json(out).into_response())
}

// ── Bind / Unbind ──────────────────────────────────────────────

/// PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn bind(
    State(state): State<ApiState>,
    headers: OsbHeaders,
    Path((instance_id, binding_id)): Path<(String, String)>,
    payload: Result<Json<BindRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let resp = state
        .engine
        .bind(&headers.actor, &instance_id, &binding_id, &request)?;
    let status = if resp.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "credentials": resp.credentials }))).into_response())
}

/// DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn unbind(
    State(state): State<ApiState>,
    headers: OsbHeaders,
    Path((instance_id, binding_id)): Path<(String, String)>,
) -> ApiResult {
    let status = match state.engine.unbind(&headers.actor, &instance_id, &binding_id)? {
        UnbindResponse::Ok => StatusCode::OK,
        UnbindResponse::Gone => StatusCode::GONE,
    };
    Ok((status, Json(json!({}))).into_response())
}
