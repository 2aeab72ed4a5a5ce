//! # Control Plane Error Taxonomy
//!
//! Every failure the control plane reports carries a stable machine code, a
//! human message and an actionable hint. The HTTP layer maps each variant to
//! a status code; everything below it only ever sees these types.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::identity::{TenantId, WorkspaceId};
use crate::key::KeyFormat;
use crate::region::RegionError;

/// The kind of entity an error or audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Vertical,
    SubVertical,
    Persona,
    Policy,
    WorkspaceBinding,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vertical => "vertical",
            Self::SubVertical => "sub_vertical",
            Self::Persona => "persona",
            Self::Policy => "policy",
            Self::WorkspaceBinding => "workspace_binding",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vertical" => Ok(Self::Vertical),
            "sub_vertical" => Ok(Self::SubVertical),
            "persona" => Ok(Self::Persona),
            "policy" => Ok(Self::Policy),
            "workspace_binding" => Ok(Self::WorkspaceBinding),
            other => Err(format!("unknown entity kind {other:?}")),
        }
    }
}

/// Input rejected before any state is read or written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid `{field}` {value:?}: {}", .format.rule())]
    InvalidKey {
        field: &'static str,
        value: String,
        format: KeyFormat,
    },

    #[error("invalid `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid `{field}`: {source}")]
    Region {
        field: &'static str,
        #[source]
        source: RegionError,
    },
}

impl ValidationError {
    /// Name of the offending input field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingField { field }
            | Self::InvalidKey { field, .. }
            | Self::InvalidValue { field, .. }
            | Self::Region { field, .. } => field,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Region { source, .. } => source.code(),
            _ => "VALIDATION_ERROR",
        }
    }
}

/// The policy permission list a stage attempt found empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmptyPolicyField {
    AllowedIntents,
    AllowedTools,
}

impl EmptyPolicyField {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllowedIntents => "EMP-001",
            Self::AllowedTools => "EMP-002",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            Self::AllowedIntents => "allowed_intents",
            Self::AllowedTools => "allowed_tools",
        }
    }
}

impl std::fmt::Display for EmptyPolicyField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}

/// Why a workspace binding could not be resolved.
///
/// Variants are listed in pipeline order; the first failing check wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionKind {
    BindingNotFound,
    BindingInactive,
    VerticalInactive,
    SubVerticalInactive,
    PersonaInactive,
    PolicyNotActive,
}

impl ResolutionKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BindingNotFound => "BINDING_NOT_FOUND",
            Self::BindingInactive => "BINDING_INACTIVE",
            Self::VerticalInactive => "VERTICAL_INACTIVE",
            Self::SubVerticalInactive => "SUB_VERTICAL_INACTIVE",
            Self::PersonaInactive => "PERSONA_INACTIVE",
            Self::PolicyNotActive => "POLICY_NOT_ACTIVE",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::BindingNotFound => "no workspace binding exists for this tenant and workspace",
            Self::BindingInactive => "the workspace binding is inactive",
            Self::VerticalInactive => "the bound vertical is inactive",
            Self::SubVerticalInactive => "the bound sub-vertical is inactive",
            Self::PersonaInactive => "the bound persona is inactive",
            Self::PolicyNotActive => "the bound persona has no ACTIVE policy",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::BindingNotFound => "Create a workspace binding for this workspace first",
            Self::BindingInactive => "Re-activate the workspace binding",
            Self::VerticalInactive => "Re-activate the vertical or bind the workspace elsewhere",
            Self::SubVerticalInactive => {
                "Re-activate the sub-vertical or bind the workspace elsewhere"
            }
            Self::PersonaInactive => "Re-activate the persona or bind the workspace elsewhere",
            Self::PolicyNotActive => "Activate a policy for this persona first",
        }
    }
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed resolution, carrying only the ids that were evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    pub kind: ResolutionKind,
    pub tenant_id: TenantId,
    pub workspace_id: WorkspaceId,
}

impl std::fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (tenant {}, workspace {})",
            self.kind.message(),
            self.tenant_id,
            self.workspace_id
        )
    }
}

/// Top-level error for every control plane operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} conflict: {message}")]
    Conflict { entity: EntityKind, message: String },

    #[error("{entity} field `{field}` is immutable")]
    ImmutableField {
        entity: EntityKind,
        field: &'static str,
    },

    #[error("cannot transition policy from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("policy cannot be staged with empty {0}")]
    EmptyPolicy(EmptyPolicyField),

    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("resolution failed: {0}")]
    Resolution(ResolutionFailure),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    pub fn not_found(entity: EntityKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: EntityKind, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            message: message.into(),
        }
    }

    pub fn invalid_transition(
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(v) => v.code(),
            Self::Conflict { .. } => "CONFLICT",
            Self::ImmutableField { .. } => "IMMUTABLE_FIELD",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::EmptyPolicy(field) => field.code(),
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Resolution(failure) => failure.kind.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Actionable next step for the caller.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Validation(ValidationError::Region { .. }) => Some(
                "LOCAL scope takes a country code (e.g. UAE), REGIONAL takes EMEA, APAC or AMER, GLOBAL takes none",
            ),
            Self::Validation(ValidationError::InvalidKey { format, .. }) => Some(format.hint()),
            Self::Validation(_) => None,
            Self::Conflict { .. } => Some("Choose a different key or update the existing record"),
            Self::ImmutableField { .. } => {
                Some("Create a new record instead of changing an immutable field")
            }
            Self::InvalidTransition { .. } => {
                Some("Policies move DRAFT -> STAGED -> ACTIVE; use rollback to re-activate a DEPRECATED version")
            }
            Self::EmptyPolicy(EmptyPolicyField::AllowedIntents) => {
                Some("Add at least one allowed intent before staging")
            }
            Self::EmptyPolicy(EmptyPolicyField::AllowedTools) => {
                Some("Add at least one allowed tool before staging")
            }
            Self::NotFound { .. } => None,
            Self::Resolution(failure) => Some(failure.kind.hint()),
            Self::Internal(_) => None,
        }
    }

    /// Only store-level failures are worth retrying, and only for reads.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Structured context for the error body.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(v) => Some(serde_json::json!({ "field": v.field() })),
            Self::Conflict { entity, .. } => Some(serde_json::json!({ "entity": entity })),
            Self::ImmutableField { entity, field } => {
                Some(serde_json::json!({ "entity": entity, "field": field }))
            }
            Self::InvalidTransition { from, to, .. } => {
                Some(serde_json::json!({ "from": from, "to": to }))
            }
            Self::EmptyPolicy(field) => Some(serde_json::json!({ "field": field.field() })),
            Self::NotFound { entity, id } => {
                Some(serde_json::json!({ "entity": entity, "id": id }))
            }
            Self::Resolution(failure) => Some(serde_json::json!({
                "tenant_id": failure.tenant_id,
                "workspace_id": failure.workspace_id,
            })),
            Self::Internal(_) => None,
        }
    }
}
