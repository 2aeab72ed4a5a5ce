//! # Operation Inputs
//!
//! One explicit input struct per operation. Every field is optional at the
//! serde level so a missing required field surfaces as a
//! [`ValidationError::MissingField`] naming it, not as a decode failure.
//! Unknown fields are ignored.
//!
//! Update inputs also accept the immutable fields of their record so an
//! attempt to change one can be rejected by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use cplane_core::key::{validate_slug_key, validate_snake_key};
use cplane_core::model::deserialize_some;
use cplane_core::{
    is_valid_region_code, validate_region_for_scope, BindingPatch, ControlPlaneError, EntityKind,
    EntityType, Persona, PersonaPatch, PersonaScope, SubVertical, SubVerticalPatch,
    ValidationError, Vertical, VerticalPatch,
};
use cplane_state::PolicyPatch;

fn required<T>(field: &'static str, value: Option<T>) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField { field })
}

fn text(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidValue {
            field,
            reason: "must not be blank".into(),
        });
    }
    Ok(trimmed.to_string())
}

fn optional_text(field: &'static str, value: Option<String>) -> Result<Option<String>, ValidationError> {
    value.map(|v| text(field, v)).transpose()
}

/// Like [`optional_text`], keeping an explicit `null` as a clear.
fn nullable_text(
    field: &'static str,
    value: Option<Option<String>>,
) -> Result<Option<Option<String>>, ValidationError> {
    value.map(|v| optional_text(field, v)).transpose()
}

fn entity_type(field: &'static str, raw: &str) -> Result<EntityType, ValidationError> {
    raw.parse().map_err(|reason| ValidationError::InvalidValue { field, reason })
}

fn entity_types(field: &'static str, raw: Vec<String>) -> Result<Vec<EntityType>, ValidationError> {
    raw.iter().map(|r| entity_type(field, r)).collect()
}

fn scope(raw: &str) -> Result<PersonaScope, ValidationError> {
    raw.parse()
        .map_err(|reason| ValidationError::InvalidValue { field: "scope", reason })
}

fn region_scope(codes: Vec<String>) -> Result<Vec<String>, ValidationError> {
    for code in &codes {
        is_valid_region_code(code)
            .into_result()
            .map_err(|source| ValidationError::Region {
                field: "region_scope",
                source,
            })?;
    }
    Ok(codes)
}

/// Reject an attempt to change an immutable field. Re-sending the current
/// value is allowed.
fn unchanged<T: PartialEq + ?Sized>(
    entity: EntityKind,
    field: &'static str,
    proposed: Option<&T>,
    current: &T,
) -> Result<(), ControlPlaneError> {
    match proposed {
        Some(value) if value != current => Err(ControlPlaneError::ImmutableField { entity, field }),
        _ => Ok(()),
    }
}

// ── Verticals ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateVerticalInput {
    pub key: Option<String>,
    pub name: Option<String>,
    pub entity_type: Option<String>,
    pub region_scope: Option<Vec<String>>,
}

impl CreateVerticalInput {
    pub fn into_record(self, now: DateTime<Utc>) -> Result<Vertical, ValidationError> {
        let key = required("key", self.key)?;
        validate_snake_key("key", &key)?;
        let name = text("name", required("name", self.name)?)?;
        let entity_type = entity_type("entity_type", &required("entity_type", self.entity_type)?)?;
        let region_scope = region_scope(self.region_scope.unwrap_or_default())?;
        Ok(Vertical {
            id: Uuid::new_v4(),
            key,
            name,
            entity_type,
            region_scope,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateVerticalInput {
    /// Immutable.
    pub key: Option<String>,
    /// Immutable.
    pub entity_type: Option<String>,
    pub name: Option<String>,
    pub region_scope: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl UpdateVerticalInput {
    pub fn into_patch(self, current: &Vertical) -> Result<VerticalPatch, ControlPlaneError> {
        unchanged(EntityKind::Vertical, "key", self.key.as_deref(), current.key.as_str())?;
        unchanged(
            EntityKind::Vertical,
            "entity_type",
            self.entity_type.as_deref(),
            current.entity_type.as_str(),
        )?;
        Ok(VerticalPatch {
            name: optional_text("name", self.name)?,
            region_scope: self.region_scope.map(region_scope).transpose()?,
            is_active: self.is_active,
        })
    }
}

// ── Sub-verticals ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateSubVerticalInput {
    pub key: Option<String>,
    pub name: Option<String>,
    pub default_agent: Option<String>,
    pub primary_entity_type: Option<String>,
    pub related_entity_types: Option<Vec<String>>,
}

impl CreateSubVerticalInput {
    pub fn into_record(
        self,
        vertical_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SubVertical, ValidationError> {
        let key = required("key", self.key)?;
        validate_snake_key("key", &key)?;
        let name = text("name", required("name", self.name)?)?;
        let default_agent = text("default_agent", required("default_agent", self.default_agent)?)?;
        let primary_entity_type = entity_type(
            "primary_entity_type",
            &required("primary_entity_type", self.primary_entity_type)?,
        )?;
        let related_entity_types = entity_types(
            "related_entity_types",
            self.related_entity_types.unwrap_or_default(),
        )?;
        Ok(SubVertical {
            id: Uuid::new_v4(),
            vertical_id,
            key,
            name,
            default_agent,
            primary_entity_type,
            related_entity_types,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateSubVerticalInput {
    /// Immutable.
    pub key: Option<String>,
    /// Immutable.
    pub vertical_id: Option<Uuid>,
    /// Immutable.
    pub primary_entity_type: Option<String>,
    pub name: Option<String>,
    pub default_agent: Option<String>,
    pub related_entity_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl UpdateSubVerticalInput {
    pub fn into_patch(self, current: &SubVertical) -> Result<SubVerticalPatch, ControlPlaneError> {
        let entity = EntityKind::SubVertical;
        unchanged(entity, "key", self.key.as_deref(), current.key.as_str())?;
        unchanged(entity, "vertical_id", self.vertical_id.as_ref(), &current.vertical_id)?;
        unchanged(
            entity,
            "primary_entity_type",
            self.primary_entity_type.as_deref(),
            current.primary_entity_type.as_str(),
        )?;
        Ok(SubVerticalPatch {
            name: optional_text("name", self.name)?,
            default_agent: optional_text("default_agent", self.default_agent)?,
            related_entity_types: self
                .related_entity_types
                .map(|r| entity_types("related_entity_types", r))
                .transpose()?,
            is_active: self.is_active,
        })
    }
}

// ── Personas ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreatePersonaInput {
    pub key: Option<String>,
    pub name: Option<String>,
    pub mission: Option<String>,
    pub decision_lens: Option<String>,
    pub scope: Option<String>,
    pub region_code: Option<String>,
}

impl CreatePersonaInput {
    pub fn into_record(
        self,
        sub_vertical_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Persona, ValidationError> {
        let key = required("key", self.key)?;
        validate_slug_key("key", &key)?;
        let name = text("name", required("name", self.name)?)?;
        let scope = scope(&required("scope", self.scope)?)?;
        validate_region_for_scope(scope, self.region_code.as_deref())
            .into_result()
            .map_err(|source| ValidationError::Region {
                field: "region_code",
                source,
            })?;
        Ok(Persona {
            id: Uuid::new_v4(),
            sub_vertical_id,
            key,
            name,
            mission: optional_text("mission", self.mission)?,
            decision_lens: optional_text("decision_lens", self.decision_lens)?,
            scope,
            region_code: self.region_code,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePersonaInput {
    /// Immutable.
    pub key: Option<String>,
    /// Immutable.
    pub sub_vertical_id: Option<Uuid>,
    pub name: Option<String>,
    /// `null` clears the mission.
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub mission: Option<Option<String>>,
    /// `null` clears the decision lens.
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub decision_lens: Option<Option<String>>,
    pub scope: Option<String>,
    /// `null` clears the region (required when moving to GLOBAL scope).
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub region_code: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl UpdatePersonaInput {
    /// Build the patch and check the region of the resulting row.
    pub fn into_patch(self, current: &Persona) -> Result<PersonaPatch, ControlPlaneError> {
        let entity = EntityKind::Persona;
        unchanged(entity, "key", self.key.as_deref(), current.key.as_str())?;
        unchanged(
            entity,
            "sub_vertical_id",
            self.sub_vertical_id.as_ref(),
            &current.sub_vertical_id,
        )?;
        let patch = PersonaPatch {
            name: optional_text("name", self.name)?,
            mission: nullable_text("mission", self.mission)?,
            decision_lens: nullable_text("decision_lens", self.decision_lens)?,
            scope: self.scope.as_deref().map(scope).transpose()?,
            region_code: self.region_code,
            is_active: self.is_active,
        };
        let mut merged = current.clone();
        merged.apply(&patch, current.updated_at);
        merged.validate_region()?;
        Ok(patch)
    }
}

// ── Policies ──

/// Reject blank entries in the permission lists and blank scopes.
pub fn validate_policy_patch(patch: &PolicyPatch) -> Result<(), ValidationError> {
    let scopes: [(&'static str, &Option<Option<String>>); 2] = [
        ("evidence_scope", &patch.evidence_scope),
        ("memory_scope", &patch.memory_scope),
    ];
    for (field, scope) in scopes {
        if scope.iter().flatten().any(|s| s.trim().is_empty()) {
            return Err(ValidationError::InvalidValue {
                field,
                reason: "must not be blank".into(),
            });
        }
    }
    let lists: [(&'static str, &Option<Vec<String>>); 3] = [
        ("allowed_intents", &patch.allowed_intents),
        ("forbidden_outputs", &patch.forbidden_outputs),
        ("allowed_tools", &patch.allowed_tools),
    ];
    for (field, list) in lists {
        if list.iter().flatten().any(|entry| entry.trim().is_empty()) {
            return Err(ValidationError::InvalidValue {
                field,
                reason: "entries must not be blank".into(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RollbackInput {
    pub target_version: Option<i32>,
}

impl RollbackInput {
    pub fn target_version(&self) -> Result<i32, ValidationError> {
        let version = required("target_version", self.target_version)?;
        if version < 1 {
            return Err(ValidationError::InvalidValue {
                field: "target_version",
                reason: "must be at least 1".into(),
            });
        }
        Ok(version)
    }
}

// ── Workspace bindings ──

/// The tenant is never part of a binding input; it comes from the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateBindingInput {
    pub vertical_id: Option<Uuid>,
    pub sub_vertical_id: Option<Uuid>,
    pub persona_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTarget {
    pub vertical_id: Uuid,
    pub sub_vertical_id: Uuid,
    pub persona_id: Uuid,
}

impl CreateBindingInput {
    pub fn target(&self) -> Result<BindingTarget, ValidationError> {
        Ok(BindingTarget {
            vertical_id: required("vertical_id", self.vertical_id)?,
            sub_vertical_id: required("sub_vertical_id", self.sub_vertical_id)?,
            persona_id: required("persona_id", self.persona_id)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateBindingInput {
    pub vertical_id: Option<Uuid>,
    pub sub_vertical_id: Option<Uuid>,
    pub persona_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

impl UpdateBindingInput {
    pub fn into_patch(self) -> BindingPatch {
        BindingPatch {
            vertical_id: self.vertical_id,
            sub_vertical_id: self.sub_vertical_id,
            persona_id: self.persona_id,
            is_active: self.is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_vertical_names_missing_field() {
        let input = CreateVerticalInput {
            key: Some("banking".into()),
            name: Some("Banking".into()),
            ..Default::default()
        };
        let err = input.into_record(Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::MissingField { field: "entity_type" });
    }

    #[test]
    fn test_create_vertical_rejects_unknown_region() {
        let input = CreateVerticalInput {
            key: Some("banking".into()),
            name: Some("Banking".into()),
            entity_type: Some("company".into()),
            region_scope: Some(vec!["UAE".into(), "Dubai".into()]),
        };
        let err = input.into_record(Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_REGION_CODE");
        assert_eq!(err.field(), "region_scope");
    }

    #[test]
    fn test_sub_vertical_rejects_unknown_entity_type() {
        let input = CreateSubVerticalInput {
            key: Some("employee_banking".into()),
            name: Some("Employee Banking".into()),
            default_agent: Some("eb_agent".into()),
            primary_entity_type: Some("household".into()),
            related_entity_types: None,
        };
        let err = input.into_record(Uuid::new_v4(), Utc::now()).unwrap_err();
        assert_eq!(err.field(), "primary_entity_type");
    }

    #[test]
    fn test_persona_local_with_regional_code() {
        let input = CreatePersonaInput {
            key: Some("eb-relationship-manager".into()),
            name: Some("RM".into()),
            scope: Some("LOCAL".into()),
            region_code: Some("EMEA".into()),
            ..Default::default()
        };
        let err = input.into_record(Uuid::new_v4(), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "REGION_SCOPE_MISMATCH");
    }

    #[test]
    fn test_update_input_distinguishes_null_region() {
        let cleared: UpdatePersonaInput =
            serde_json::from_str(r#"{"scope":"GLOBAL","region_code":null}"#).unwrap();
        assert_eq!(cleared.region_code, Some(None));
        let absent: UpdatePersonaInput = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(absent.region_code, None);
    }

    #[test]
    fn test_persona_update_trims_and_clears_text() {
        let now = Utc::now();
        let current = Persona {
            id: Uuid::new_v4(),
            sub_vertical_id: Uuid::new_v4(),
            key: "eb-rm".into(),
            name: "RM".into(),
            mission: Some("Grow payroll accounts".into()),
            decision_lens: Some("employer size".into()),
            scope: PersonaScope::Local,
            region_code: Some("UAE".into()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let input: UpdatePersonaInput =
            serde_json::from_str(r#"{"mission":"  Retain payroll  ","decision_lens":null}"#).unwrap();
        let patch = input.into_patch(&current).unwrap();
        assert_eq!(patch.mission, Some(Some("Retain payroll".into())));
        assert_eq!(patch.decision_lens, Some(None));

        let mut after = current.clone();
        after.apply(&patch, now);
        assert_eq!(after.mission.as_deref(), Some("Retain payroll"));
        assert_eq!(after.decision_lens, None);

        let blank: UpdatePersonaInput = serde_json::from_str(r#"{"mission":"   "}"#).unwrap();
        let err = blank.into_patch(&current).unwrap_err();
        assert!(matches!(
            err,
            ControlPlaneError::Validation(ValidationError::InvalidValue { field: "mission", .. })
        ));
    }

    #[test]
    fn test_policy_patch_null_clears_scope() {
        let patch: PolicyPatch =
            serde_json::from_str(r#"{"evidence_scope":null,"memory_scope":"session"}"#).unwrap();
        assert_eq!(patch.evidence_scope, Some(None));
        assert_eq!(patch.memory_scope, Some(Some("session".into())));
        let absent: PolicyPatch = serde_json::from_str("{}").unwrap();
        assert!(absent.is_empty());
        let blank: PolicyPatch = serde_json::from_str(r#"{"memory_scope":" "}"#).unwrap();
        assert_eq!(validate_policy_patch(&blank).unwrap_err().field(), "memory_scope");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let input: CreateBindingInput = serde_json::from_str(
            r#"{"tenant_id":"00000000-0000-0000-0000-000000000001","persona_id":null}"#,
        )
        .unwrap();
        assert_eq!(
            input.target().unwrap_err(),
            ValidationError::MissingField { field: "vertical_id" }
        );
    }

    #[test]
    fn test_immutable_key_change_rejected() {
        let now = Utc::now();
        let current = Vertical {
            id: Uuid::new_v4(),
            key: "banking".into(),
            name: "Banking".into(),
            entity_type: EntityType::Company,
            region_scope: vec![],
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let same = UpdateVerticalInput {
            key: Some("banking".into()),
            name: Some("Retail Banking".into()),
            ..Default::default()
        };
        assert!(same.into_patch(&current).is_ok());
        let changed = UpdateVerticalInput {
            key: Some("retail".into()),
            ..Default::default()
        };
        let err = changed.into_patch(&current).unwrap_err();
        assert_eq!(
            err,
            ControlPlaneError::ImmutableField {
                entity: EntityKind::Vertical,
                field: "key"
            }
        );
    }

    #[test]
    fn test_policy_patch_blank_entries() {
        let patch = PolicyPatch {
            allowed_tools: Some(vec!["crm".into(), " ".into()]),
            ..Default::default()
        };
        assert_eq!(validate_policy_patch(&patch).unwrap_err().field(), "allowed_tools");
    }

    #[test]
    fn test_rollback_requires_version() {
        assert!(RollbackInput::default().target_version().is_err());
        assert_eq!(
            RollbackInput {
                target_version: Some(0)
            }
            .target_version()
            .unwrap_err()
            .field(),
            "target_version"
        );
    }
}
