//! # Catalog API
//!
//! Verticals, their sub-verticals and the personas under them. Reads are
//! open to every role; writes require `admin`.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use cplane_core::{AuditAction, EntityKind, Persona, SubVertical, Vertical};
use cplane_engine::input::{
    CreatePersonaInput, CreateSubVerticalInput, CreateVerticalInput, UpdatePersonaInput,
    UpdateSubVerticalInput, UpdateVerticalInput,
};

use crate::auth::{CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_path};
use crate::routes::{body_value, path_value, updated_response, EdgeAudit};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/verticals", post(create_vertical))
        .route("/v1/verticals/{id}", get(get_vertical).patch(update_vertical))
        .route("/v1/verticals/{id}/sub-verticals", post(create_sub_vertical))
        .route(
            "/v1/sub-verticals/{id}",
            get(get_sub_vertical).patch(update_sub_vertical),
        )
        .route("/v1/sub-verticals/{id}/personas", post(create_persona))
        .route("/v1/personas/{id}", get(get_persona).patch(update_persona))
}

// -- Verticals ----------------------------------------------------------------

/// POST /v1/verticals
#[utoipa::path(
    post,
    path = "/v1/verticals",
    request_body = CreateVerticalInput,
    responses(
        (status = 201, description = "Vertical created", body = Vertical),
        (status = 409, description = "Key already taken", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn create_vertical(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateVerticalInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Vertical>), AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::VerticalCreate, EntityKind::Vertical)
        .body(&body);
    edge.authorize(Role::Admin).await?;
    let input = edge.check(extract_json(body)).await?;
    let vertical = state
        .control_plane
        .entities()
        .create_vertical(&caller.actor(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(vertical)))
}

#[utoipa::path(
    get,
    path = "/v1/verticals/{id}",
    params(("id" = Uuid, Path, description = "Vertical ID")),
    responses(
        (status = 200, description = "Vertical found", body = Vertical),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn get_vertical(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vertical>, AppError> {
    let id = extract_path(id)?;
    Ok(Json(state.control_plane.entities().get_vertical(id).await?))
}

/// PATCH /v1/verticals/{id}. `key` and `entity_type` may be repeated but
/// not changed.
#[utoipa::path(
    patch,
    path = "/v1/verticals/{id}",
    params(("id" = Uuid, Path, description = "Vertical ID")),
    request_body = UpdateVerticalInput,
    responses(
        (status = 200, description = "Vertical updated; x-cplane-blast-radius set on deactivation", body = Vertical),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Immutable field or validation failure", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn update_vertical(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateVerticalInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::VerticalUpdate, EntityKind::Vertical)
        .target(&id)
        .body(&body);
    edge.authorize(Role::Admin).await?;
    let id = edge.check(extract_path(id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let updated = state
        .control_plane
        .entities()
        .update_vertical(&caller.actor(), id, input)
        .await?;
    Ok(updated_response(updated))
}

// -- Sub-verticals ------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/verticals/{id}/sub-verticals",
    params(("id" = Uuid, Path, description = "Parent vertical ID")),
    request_body = CreateSubVerticalInput,
    responses(
        (status = 201, description = "Sub-vertical created", body = SubVertical),
        (status = 404, description = "Vertical not found", body = crate::error::ErrorBody),
        (status = 409, description = "Key already taken in this vertical", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn create_sub_vertical(
    State(state): State<AppState>,
    caller: CallerIdentity,
    vertical_id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CreateSubVerticalInput>, JsonRejection>,
) -> Result<(StatusCode, Json<SubVertical>), AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::SubVerticalCreate, EntityKind::SubVertical)
        .request(json!({ "vertical_id": path_value(&vertical_id), "input": body_value(&body) }));
    edge.authorize(Role::Admin).await?;
    let vertical_id = edge.check(extract_path(vertical_id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let sub_vertical = state
        .control_plane
        .entities()
        .create_sub_vertical(&caller.actor(), vertical_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(sub_vertical)))
}

#[utoipa::path(
    get,
    path = "/v1/sub-verticals/{id}",
    params(("id" = Uuid, Path, description = "Sub-vertical ID")),
    responses(
        (status = 200, description = "Sub-vertical found", body = SubVertical),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn get_sub_vertical(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SubVertical>, AppError> {
    let id = extract_path(id)?;
    Ok(Json(state.control_plane.entities().get_sub_vertical(id).await?))
}

#[utoipa::path(
    patch,
    path = "/v1/sub-verticals/{id}",
    params(("id" = Uuid, Path, description = "Sub-vertical ID")),
    request_body = UpdateSubVerticalInput,
    responses(
        (status = 200, description = "Sub-vertical updated", body = SubVertical),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Immutable field or validation failure", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn update_sub_vertical(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateSubVerticalInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::SubVerticalUpdate, EntityKind::SubVertical)
        .target(&id)
        .body(&body);
    edge.authorize(Role::Admin).await?;
    let id = edge.check(extract_path(id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let updated = state
        .control_plane
        .entities()
        .update_sub_vertical(&caller.actor(), id, input)
        .await?;
    Ok(updated_response(updated))
}

// -- Personas -----------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/sub-verticals/{id}/personas",
    params(("id" = Uuid, Path, description = "Parent sub-vertical ID")),
    request_body = CreatePersonaInput,
    responses(
        (status = 201, description = "Persona created", body = Persona),
        (status = 404, description = "Sub-vertical not found", body = crate::error::ErrorBody),
        (status = 409, description = "Key already taken in this sub-vertical", body = crate::error::ErrorBody),
        (status = 422, description = "Validation or region scope failure", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn create_persona(
    State(state): State<AppState>,
    caller: CallerIdentity,
    sub_vertical_id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CreatePersonaInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Persona>), AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::PersonaCreate, EntityKind::Persona)
        .request(json!({ "sub_vertical_id": path_value(&sub_vertical_id), "input": body_value(&body) }));
    edge.authorize(Role::Admin).await?;
    let sub_vertical_id = edge.check(extract_path(sub_vertical_id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let persona = state
        .control_plane
        .entities()
        .create_persona(&caller.actor(), sub_vertical_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(persona)))
}

#[utoipa::path(
    get,
    path = "/v1/personas/{id}",
    params(("id" = Uuid, Path, description = "Persona ID")),
    responses(
        (status = 200, description = "Persona found", body = Persona),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn get_persona(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Persona>, AppError> {
    let id = extract_path(id)?;
    Ok(Json(state.control_plane.entities().get_persona(id).await?))
}

/// PATCH /v1/personas/{id}. Send `"region_code": null` to clear the region.
#[utoipa::path(
    patch,
    path = "/v1/personas/{id}",
    params(("id" = Uuid, Path, description = "Persona ID")),
    request_body = UpdatePersonaInput,
    responses(
        (status = 200, description = "Persona updated", body = Persona),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Immutable field, validation or region scope failure", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn update_persona(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdatePersonaInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let edge = EdgeAudit::new(&state, &caller, AuditAction::PersonaUpdate, EntityKind::Persona)
        .target(&id)
        .body(&body);
    edge.authorize(Role::Admin).await?;
    let id = edge.check(extract_path(id)).await?;
    let input = edge.check(extract_json(body)).await?;
    let updated = state
        .control_plane
        .entities()
        .update_persona(&caller.actor(), id, input)
        .await?;
    Ok(updated_response(updated))
}
