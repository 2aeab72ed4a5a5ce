//! # Audit API
//!
//! Read access to the append-only audit log. `admin` only, and always
//! scoped to the caller's tenant: entries written by another tenant's
//! actors are never returned.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use cplane_core::{AuditPage, AuditQuery, ChainIntegrity};

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::extract_query;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/audit", get(query_audit))
        .route("/v1/audit/verify", get(verify_audit_chain))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyParams {
    /// Newest entries to walk (default 10000, max 100000).
    pub limit: Option<u32>,
}

/// GET /v1/audit: filtered page, newest first, with distinct facets. A
/// `tenant_id` in the query string is replaced by the caller's tenant.
#[utoipa::path(
    get,
    path = "/v1/audit",
    params(
        ("action" = Option<String>, Query, description = "e.g. policy.activate"),
        ("target_type" = Option<String>, Query, description = "vertical, sub_vertical, persona, policy or workspace_binding"),
        ("actor" = Option<String>, Query, description = "Actor ID"),
        ("target_id" = Option<String>, Query, description = "Target entity ID"),
        ("from" = Option<String>, Query, description = "RFC 3339, inclusive"),
        ("to" = Option<String>, Query, description = "RFC 3339, exclusive"),
        ("limit" = Option<u32>, Query, description = "Page size (default 50, max 500)"),
        ("offset" = Option<u32>, Query, description = "Entries to skip"),
    ),
    responses(
        (status = 200, description = "Audit page", body = AuditPage),
        (status = 403, description = "Caller is not admin", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
pub async fn query_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> Result<Json<AuditPage>, AppError> {
    require_role(&caller, Role::Admin)?;
    let mut query = extract_query(query)?;
    query.tenant_id = Some(caller.tenant_id);
    Ok(Json(state.control_plane.audit().query(&query).await?))
}

/// GET /v1/audit/verify: recompute hashes and links over the newest entries.
#[utoipa::path(
    get,
    path = "/v1/audit/verify",
    params(VerifyParams),
    responses(
        (status = 200, description = "Chain integrity report", body = ChainIntegrity),
        (status = 403, description = "Caller is not admin", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
pub async fn verify_audit_chain(
    State(state): State<AppState>,
    caller: CallerIdentity,
    params: Result<Query<VerifyParams>, QueryRejection>,
) -> Result<Json<ChainIntegrity>, AppError> {
    require_role(&caller, Role::Admin)?;
    let params = extract_query(params)?;
    Ok(Json(state.control_plane.audit().verify(params.limit).await?))
}
