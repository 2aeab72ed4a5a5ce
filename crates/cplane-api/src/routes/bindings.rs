//! # Workspace Binding API
//!
//! Bindings and resolution are always scoped to the caller's tenant; a
//! workspace of another tenant is indistinguishable from one that was never
//! bound.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use cplane_core::{AuditAction, EntityKind, WorkspaceBinding, WorkspaceId};
use cplane_engine::input::{CreateBindingInput, UpdateBindingInput};
use cplane_state::ResolvedConfig;

use crate::auth::{CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_path};
use crate::routes::{body_value, path_value, updated_response, EdgeAudit};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/workspaces/{workspace_id}/binding",
            get(get_binding).put(create_binding).patch(update_binding),
        )
        .route("/v1/workspaces/{workspace_id}/resolve", get(resolve_binding))
}

#[utoipa::path(
    put,
    path = "/v1/workspaces/{workspace_id}/binding",
    params(("workspace_id" = uuid::Uuid, Path, description = "Workspace ID")),
    request_body = CreateBindingInput,
    responses(
        (status = 201, description = "Workspace bound", body = WorkspaceBinding),
        (status = 404, description = "Vertical, sub-vertical or persona not found", body = crate::error::ErrorBody),
        (status = 409, description = "Workspace already bound", body = crate::error::ErrorBody),
        (status = 422, description = "Chain does not line up", body = crate::error::ErrorBody),
    ),
    tag = "bindings"
)]
pub async fn create_binding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    workspace_id: Result<Path<WorkspaceId>, PathRejection>,
    body: Result<Json<CreateBindingInput>, JsonRejection>,
) -> Result<(StatusCode, Json<WorkspaceBinding>), AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::BindingCreate, EntityKind::WorkspaceBinding)
        .request(json!({
            "tenant_id": caller.tenant_id,
            "workspace_id": path_value(&workspace_id),
            "input": body_value(&body),
        }));
    edge.authorize(Role::Editor).await?;
    let workspace_id = edge.check(extract_path(workspace_id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let binding = state
        .control_plane
        .entities()
        .create_binding(&caller.actor(), caller.tenant_id, workspace_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

#[utoipa::path(
    patch,
    path = "/v1/workspaces/{workspace_id}/binding",
    params(("workspace_id" = uuid::Uuid, Path, description = "Workspace ID")),
    request_body = UpdateBindingInput,
    responses(
        (status = 200, description = "Binding updated", body = WorkspaceBinding),
        (status = 404, description = "Workspace not bound", body = crate::error::ErrorBody),
        (status = 422, description = "Chain does not line up", body = crate::error::ErrorBody),
    ),
    tag = "bindings"
)]
pub async fn update_binding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    workspace_id: Result<Path<WorkspaceId>, PathRejection>,
    body: Result<Json<UpdateBindingInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::BindingUpdate, EntityKind::WorkspaceBinding)
        .request(json!({
            "tenant_id": caller.tenant_id,
            "workspace_id": path_value(&workspace_id),
            "input": body_value(&body),
        }));
    edge.authorize(Role::Editor).await?;
    let workspace_id = edge.check(extract_path(workspace_id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let updated = state
        .control_plane
        .entities()
        .update_binding(&caller.actor(), caller.tenant_id, workspace_id, input)
        .await?;
    Ok(updated_response(updated))
}

#[utoipa::path(
    get,
    path = "/v1/workspaces/{workspace_id}/binding",
    params(("workspace_id" = uuid::Uuid, Path, description = "Workspace ID")),
    responses(
        (status = 200, description = "Binding found", body = WorkspaceBinding),
        (status = 404, description = "Workspace not bound", body = crate::error::ErrorBody),
    ),
    tag = "bindings"
)]
pub async fn get_binding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    workspace_id: Result<Path<WorkspaceId>, PathRejection>,
) -> Result<Json<WorkspaceBinding>, AppError> {
    let workspace_id = extract_path(workspace_id)?;
    let binding = state
        .control_plane
        .entities()
        .get_binding(caller.tenant_id, workspace_id)
        .await?;
    Ok(Json(binding))
}

/// GET /v1/workspaces/{workspace_id}/resolve: the effective configuration
/// of the workspace for the caller's tenant.
#[utoipa::path(
    get,
    path = "/v1/workspaces/{workspace_id}/resolve",
    params(("workspace_id" = uuid::Uuid, Path, description = "Workspace ID")),
    responses(
        (status = 200, description = "Resolved configuration", body = ResolvedConfig),
        (status = 404, description = "BINDING_NOT_FOUND", body = crate::error::ErrorBody),
        (status = 409, description = "BINDING_INACTIVE, VERTICAL_INACTIVE, SUB_VERTICAL_INACTIVE, PERSONA_INACTIVE or POLICY_NOT_ACTIVE", body = crate::error::ErrorBody),
    ),
    tag = "bindings"
)]
pub async fn resolve_binding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    workspace_id: Result<Path<WorkspaceId>, PathRejection>,
) -> Result<Json<ResolvedConfig>, AppError> {
    let workspace_id = extract_path(workspace_id)?;
    let config = state
        .control_plane
        .resolver()
        .resolve(&caller.actor(), caller.tenant_id, workspace_id)
        .await?;
    Ok(Json(config))
}
