//! # Policy Lifecycle API
//!
//! DRAFT → STAGED → ACTIVE → DEPRECATED, one chain per persona. Every
//! transition requires `admin`; reads are open to every role.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use cplane_core::{AuditAction, EntityKind};
use cplane_engine::input::RollbackInput;
use cplane_state::{Policy, PolicyPatch};

use crate::auth::{CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_path, optional_json};
use crate::routes::{body_value, path_value, EdgeAudit};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/personas/{id}/policies",
            get(list_policy_versions).post(create_policy),
        )
        .route("/v1/personas/{id}/policies/rollback", post(rollback_policy))
        .route("/v1/policies/{id}", get(get_policy).patch(edit_policy))
        .route("/v1/policies/{id}/stage", post(stage_policy))
        .route("/v1/policies/{id}/activate", post(activate_policy))
}

/// POST /v1/personas/{id}/policies: start the chain at version 1. The body
/// carries optional initial fields and may be omitted.
#[utoipa::path(
    post,
    path = "/v1/personas/{id}/policies",
    params(("id" = Uuid, Path, description = "Persona ID")),
    request_body(content = PolicyPatch, description = "Initial policy fields (optional)"),
    responses(
        (status = 201, description = "DRAFT version 1 created", body = Policy),
        (status = 404, description = "Persona not found", body = crate::error::ErrorBody),
        (status = 409, description = "Persona already has a policy chain", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn create_policy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    persona_id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<(StatusCode, Json<Policy>), AppError> {
    let raw: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let edge = EdgeAudit::new(&state, &caller, AuditAction::PolicyCreate, EntityKind::Policy)
        .request(json!({ "persona_id": path_value(&persona_id), "initial": raw }));
    edge.authorize(Role::Admin).await?;
    let persona_id = edge.check(extract_path(persona_id)).await?;
    let initial = edge.check(optional_json::<PolicyPatch>(&body)).await?;
    let policy = state
        .control_plane
        .lifecycle()
        .create(&caller.actor(), persona_id, initial)
        .await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

#[utoipa::path(
    get,
    path = "/v1/personas/{id}/policies",
    params(("id" = Uuid, Path, description = "Persona ID")),
    responses(
        (status = 200, description = "Every version, ascending", body = Vec<Policy>),
    ),
    tag = "policies"
)]
pub async fn list_policy_versions(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    persona_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<Policy>>, AppError> {
    let persona_id = extract_path(persona_id)?;
    Ok(Json(
        state.control_plane.lifecycle().versions(persona_id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/v1/policies/{id}",
    params(("id" = Uuid, Path, description = "Policy ID")),
    responses(
        (status = 200, description = "Policy found", body = Policy),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn get_policy(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Policy>, AppError> {
    let id = extract_path(id)?;
    Ok(Json(state.control_plane.lifecycle().get(id).await?))
}

/// PATCH /v1/policies/{id}: edits a DRAFT in place. Any other status forks
/// a new DRAFT at the next version; the response is the DRAFT written.
#[utoipa::path(
    patch,
    path = "/v1/policies/{id}",
    params(("id" = Uuid, Path, description = "Policy ID")),
    request_body = PolicyPatch,
    responses(
        (status = 200, description = "DRAFT written", body = Policy),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn edit_policy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<PolicyPatch>, JsonRejection>,
) -> Result<Json<Policy>, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::PolicyEdit, EntityKind::Policy)
        .target(&id)
        .body(&body);
    edge.authorize(Role::Admin).await?;
    let id = edge.check(extract_path(id)).await?;
    let patch = edge.check(extract_json(body)).await?;
    let policy = state
        .control_plane
        .lifecycle()
        .edit(&caller.actor(), id, patch)
        .await?;
    Ok(Json(policy))
}

#[utoipa::path(
    post,
    path = "/v1/policies/{id}/stage",
    params(("id" = Uuid, Path, description = "Policy ID")),
    responses(
        (status = 200, description = "Policy STAGED (no-op if already STAGED)", body = Policy),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Not a DRAFT", body = crate::error::ErrorBody),
        (status = 422, description = "EMP-001 / EMP-002 empty policy", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn stage_policy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Policy>, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::PolicyStage, EntityKind::Policy)
        .target(&id)
        .request(json!({ "policy_id": path_value(&id) }));
    edge.authorize(Role::Admin).await?;
    let id = edge.check(extract_path(id)).await?;
    let policy = state
        .control_plane
        .lifecycle()
        .stage(&caller.actor(), id)
        .await?;
    Ok(Json(policy))
}

#[utoipa::path(
    post,
    path = "/v1/policies/{id}/activate",
    params(("id" = Uuid, Path, description = "Policy ID")),
    responses(
        (status = 200, description = "Policy ACTIVE; the previous ACTIVE is DEPRECATED", body = Policy),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Not STAGED", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn activate_policy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Policy>, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::PolicyActivate, EntityKind::Policy)
        .target(&id)
        .request(json!({ "policy_id": path_value(&id) }));
    edge.authorize(Role::Admin).await?;
    let id = edge.check(extract_path(id)).await?;
    let policy = state
        .control_plane
        .lifecycle()
        .activate(&caller.actor(), id)
        .await?;
    Ok(Json(policy))
}

#[utoipa::path(
    post,
    path = "/v1/personas/{id}/policies/rollback",
    params(("id" = Uuid, Path, description = "Persona ID")),
    request_body = RollbackInput,
    responses(
        (status = 200, description = "Target version ACTIVE again", body = Policy),
        (status = 404, description = "Version not found", body = crate::error::ErrorBody),
        (status = 409, description = "Target is not DEPRECATED", body = crate::error::ErrorBody),
        (status = 422, description = "EMP-001 / EMP-002 empty policy", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn rollback_policy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    persona_id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<RollbackInput>, JsonRejection>,
) -> Result<Json<Policy>, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::PolicyRollback, EntityKind::Policy)
        .request(json!({ "persona_id": path_value(&persona_id), "input": body_value(&body) }));
    edge.authorize(Role::Admin).await?;
    let persona_id = edge.check(extract_path(persona_id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let policy = state
        .control_plane
        .lifecycle()
        .rollback(&caller.actor(), persona_id, input)
        .await?;
    Ok(Json(policy))
}
