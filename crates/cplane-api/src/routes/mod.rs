//! # API Routes
//!
//! - [`catalog`]: verticals, sub-verticals and personas.
//! - [`policies`]: the versioned policy lifecycle.
//! - [`bindings`]: workspace bindings and resolution.
//! - [`audit`]: audit log queries and chain verification.
//!
//! Handlers only extract, authorize and delegate to [`cplane_engine`].
//! Mutating handlers run their own checks through an [`EdgeAudit`], so a
//! call refused before it reaches the engine is still audited.

pub mod audit;
pub mod bindings;
pub mod catalog;
pub mod policies;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::Path;
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use cplane_core::{AuditAction, AuditDraft, EntityKind, Updated};
use cplane_engine::AuditLog;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::state::AppState;

/// Set on update responses when a deactivation touched active bindings.
pub const BLAST_RADIUS_HEADER: HeaderName = HeaderName::from_static("x-cplane-blast-radius");

/// Respond with the updated record, plus the blast-radius header when the
/// update deactivated something still in use.
pub(crate) fn updated_response<T: Serialize>(updated: Updated<T>) -> Response {
    let blast_radius = updated.blast_radius;
    let mut response = Json(updated.after).into_response();
    if let Some(radius) = blast_radius {
        response
            .headers_mut()
            .insert(BLAST_RADIUS_HEADER, HeaderValue::from(radius.active_bindings));
    }
    response
}

/// A decoded JSON body as an audit snapshot; `null` when it did not decode.
pub(crate) fn body_value<T: Serialize>(body: &Result<Json<T>, JsonRejection>) -> Value {
    body.as_ref()
        .ok()
        .and_then(|json| serde_json::to_value(&json.0).ok())
        .unwrap_or(Value::Null)
}

/// A decoded path parameter as an audit snapshot; `null` when it did not decode.
pub(crate) fn path_value<T: Serialize>(path: &Result<Path<T>, PathRejection>) -> Value {
    path.as_ref()
        .ok()
        .and_then(|p| serde_json::to_value(&p.0).ok())
        .unwrap_or(Value::Null)
}

/// Audit context for the checks a mutating handler runs before delegating.
/// The first failed check is recorded as a failed entry under the
/// operation's action; the engine records everything after that.
pub(crate) struct EdgeAudit<'a> {
    audit: &'a AuditLog,
    caller: &'a CallerIdentity,
    action: AuditAction,
    target_type: EntityKind,
    target_id: Option<String>,
    request: Value,
}

impl<'a> EdgeAudit<'a> {
    pub(crate) fn new(
        state: &'a AppState,
        caller: &'a CallerIdentity,
        action: AuditAction,
        target_type: EntityKind,
    ) -> Self {
        Self {
            audit: state.control_plane.audit(),
            caller,
            action,
            target_type,
            target_id: None,
            request: Value::Null,
        }
    }

    /// Target id taken from the path, when it decoded.
    pub(crate) fn target<T: ToString>(mut self, path: &Result<Path<T>, PathRejection>) -> Self {
        self.target_id = path.as_ref().ok().map(|p| p.0.to_string());
        self
    }

    /// Request body, when it decoded.
    pub(crate) fn body<T: Serialize>(self, body: &Result<Json<T>, JsonRejection>) -> Self {
        self.request(body_value(body))
    }

    pub(crate) fn request(mut self, request: Value) -> Self {
        self.request = request;
        self
    }

    /// 403 unless the caller holds `minimum`.
    pub(crate) async fn authorize(&self, minimum: Role) -> Result<(), AppError> {
        self.check(require_role(self.caller, minimum)).await
    }

    /// Pass `result` through, auditing it if it failed.
    pub(crate) async fn check<T>(&self, result: Result<T, AppError>) -> Result<T, AppError> {
        if let Some(draft) = result.as_ref().err().map(|err| self.rejection(err)) {
            self.audit.record(draft).await;
        }
        result
    }

    fn rejection(&self, err: &AppError) -> AuditDraft {
        let actor = self.caller.actor();
        tracing::info!(
            action = %self.action,
            actor = %actor.id,
            code = err.code(),
            "request rejected before reaching the engine"
        );
        AuditDraft::rejected(
            &actor,
            self.action,
            self.target_type,
            self.target_id.clone(),
            self.request.clone(),
            err.code(),
            err.to_string(),
        )
    }
}
