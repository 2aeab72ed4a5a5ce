//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Control Plane API",
        version = "0.1.0",
        description = "Verticals, sub-verticals, personas, the versioned policy lifecycle, workspace binding resolution and the hash-chained audit log."
    ),
    paths(
        // Catalog
        crate::routes::catalog::create_vertical,
        crate::routes::catalog::get_vertical,
        crate::routes::catalog::update_vertical,
        crate::routes::catalog::create_sub_vertical,
        crate::routes::catalog::get_sub_vertical,
        crate::routes::catalog::update_sub_vertical,
        crate::routes::catalog::create_persona,
        crate::routes::catalog::get_persona,
        crate::routes::catalog::update_persona,
        // Policies
        crate::routes::policies::create_policy,
        crate::routes::policies::list_policy_versions,
        crate::routes::policies::get_policy,
        crate::routes::policies::edit_policy,
        crate::routes::policies::stage_policy,
        crate::routes::policies::activate_policy,
        crate::routes::policies::rollback_policy,
        // Bindings
        crate::routes::bindings::create_binding,
        crate::routes::bindings::update_binding,
        crate::routes::bindings::get_binding,
        crate::routes::bindings::resolve_binding,
        // Audit
        crate::routes::audit::query_audit,
        crate::routes::audit::verify_audit_chain,
    ),
    components(schemas(
        // Records
        cplane_core::Vertical,
        cplane_core::SubVertical,
        cplane_core::Persona,
        cplane_core::WorkspaceBinding,
        cplane_core::EntityType,
        cplane_core::PersonaScope,
        cplane_state::Policy,
        cplane_state::PolicyStatus,
        cplane_state::CostBudget,
        cplane_state::LatencyBudget,
        cplane_state::ResolvedConfig,
        cplane_state::ResolvedVertical,
        cplane_state::ResolvedSubVertical,
        cplane_state::ResolvedPersona,
        cplane_state::ResolvedPolicy,
        // Audit
        cplane_core::AuditEntry,
        cplane_core::AuditAction,
        cplane_core::EntityKind,
        cplane_core::AuditPage,
        cplane_core::ChainIntegrity,
        // Requests
        cplane_engine::input::CreateVerticalInput,
        cplane_engine::input::UpdateVerticalInput,
        cplane_engine::input::CreateSubVerticalInput,
        cplane_engine::input::UpdateSubVerticalInput,
        cplane_engine::input::CreatePersonaInput,
        cplane_engine::input::UpdatePersonaInput,
        cplane_engine::input::CreateBindingInput,
        cplane_engine::input::UpdateBindingInput,
        cplane_engine::input::RollbackInput,
        cplane_state::PolicyPatch,
        // Errors
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "catalog", description = "Verticals, sub-verticals and personas"),
        (name = "policies", description = "Versioned policy lifecycle"),
        (name = "bindings", description = "Workspace bindings and resolution"),
        (name = "audit", description = "Audit log queries and chain verification"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
