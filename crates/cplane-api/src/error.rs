//! # API Error Types
//!
//! Maps [`ControlPlaneError`] and the HTTP-edge failures to status codes and
//! a structured JSON body:
//!
//! ```json
//! {"error": {"code": "EMP-001", "message": "...", "hint": "...", "details": {...}}}
//! ```
//!
//! Internal error messages are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use cplane_core::{ControlPlaneError, ResolutionKind};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Stable machine-readable code (e.g. `REGION_SCOPE_MISMATCH`).
    pub code: String,
    pub message: String,
    /// Actionable next step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    /// Body or query string could not be decoded (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No verified caller identity (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller role too low (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Backing store not reachable (503).
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::ControlPlane(err) => {
                let status = match err {
                    ControlPlaneError::Validation(_)
                    | ControlPlaneError::ImmutableField { .. }
                    | ControlPlaneError::EmptyPolicy(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    ControlPlaneError::Conflict { .. }
                    | ControlPlaneError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    ControlPlaneError::NotFound { .. } => StatusCode::NOT_FOUND,
                    ControlPlaneError::Resolution(failure) => match failure.kind {
                        ResolutionKind::BindingNotFound => StatusCode::NOT_FOUND,
                        _ => StatusCode::CONFLICT,
                    },
                    ControlPlaneError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code())
            }
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        }
    }

    /// The stable code sent in the error body.
    pub fn code(&self) -> &'static str {
        self.status_and_code().1
    }

    fn is_internal(&self) -> bool {
        matches!(self, Self::ControlPlane(ControlPlaneError::Internal(_)))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if self.is_internal() {
            tracing::error!(error = %self, "internal server error");
        }

        let (message, hint, details) = match &self {
            Self::ControlPlane(ControlPlaneError::Internal(_)) => {
                ("An internal error occurred".to_string(), None, None)
            }
            Self::ControlPlane(err) => (
                err.to_string(),
                err.hint().map(str::to_string),
                err.details(),
            ),
            other => (other.to_string(), None, None),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                hint,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
