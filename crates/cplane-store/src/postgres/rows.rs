//! Database row types and their conversion into records.
//!
//! Rows derive both `sqlx::FromRow` (column reads) and `Deserialize` (the
//! `to_jsonb` columns of the resolution snapshot query). Enum columns are
//! stored as text and parsed here; a value that fails to parse is reported
//! as an internal error rather than silently skipped.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use cplane_core::{
    AuditEntry, ControlPlaneError, EntityType, Persona, SubVertical, TenantId, Vertical,
    WorkspaceBinding, WorkspaceId,
};
use cplane_state::Policy;

pub(crate) const VERTICAL_COLUMNS: &str =
    "id, key, name, entity_type, region_scope, is_active, created_at, updated_at";

pub(crate) const SUB_VERTICAL_COLUMNS: &str = "id, vertical_id, key, name, default_agent, \
     primary_entity_type, related_entity_types, is_active, created_at, updated_at";

pub(crate) const PERSONA_COLUMNS: &str = "id, sub_vertical_id, key, name, mission, decision_lens, \
     scope, region_code, is_active, created_at, updated_at";

pub(crate) const POLICY_COLUMNS: &str = "id, persona_id, policy_version, status, allowed_intents, \
     forbidden_outputs, allowed_tools, evidence_scope, memory_scope, cost_budget, latency_budget, \
     escalation_rules, disclaimer_rules, created_at, updated_at, staged_at, activated_at, deprecated_at";

pub(crate) const BINDING_COLUMNS: &str = "id, tenant_id, workspace_id, vertical_id, \
     sub_vertical_id, persona_id, is_active, created_at, updated_at";

pub(crate) const AUDIT_COLUMNS: &str = "id, actor, tenant_id, action, target_type, target_id, \
     request, result, success, error_code, error_message, previous_hash, entry_hash, created_at";

fn corrupt(table: &str, id: Uuid, detail: impl std::fmt::Display) -> ControlPlaneError {
    tracing::error!(table, %id, %detail, "unreadable row");
    ControlPlaneError::Internal(format!("unreadable {table} row {id}: {detail}"))
}

#[derive(sqlx::FromRow, Deserialize)]
pub(crate) struct VerticalRow {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub entity_type: String,
    pub region_scope: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerticalRow {
    pub fn into_record(self) -> Result<Vertical, ControlPlaneError> {
        let entity_type = self
            .entity_type
            .parse()
            .map_err(|e| corrupt("vertical", self.id, e))?;
        Ok(Vertical {
            id: self.id,
            key: self.key,
            name: self.name,
            entity_type,
            region_scope: self.region_scope,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow, Deserialize)]
pub(crate) struct SubVerticalRow {
    pub id: Uuid,
    pub vertical_id: Uuid,
    pub key: String,
    pub name: String,
    pub default_agent: String,
    pub primary_entity_type: String,
    pub related_entity_types: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubVerticalRow {
    pub fn into_record(self) -> Result<SubVertical, ControlPlaneError> {
        let primary_entity_type = self
            .primary_entity_type
            .parse()
            .map_err(|e| corrupt("sub_vertical", self.id, e))?;
        let related_entity_types = self
            .related_entity_types
            .iter()
            .map(|s| s.parse::<EntityType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt("sub_vertical", self.id, e))?;
        Ok(SubVertical {
            id: self.id,
            vertical_id: self.vertical_id,
            key: self.key,
            name: self.name,
            default_agent: self.default_agent,
            primary_entity_type,
            related_entity_types,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow, Deserialize)]
pub(crate) struct PersonaRow {
    pub id: Uuid,
    pub sub_vertical_id: Uuid,
    pub key: String,
    pub name: String,
    pub mission: Option<String>,
    pub decision_lens: Option<String>,
    pub scope: String,
    pub region_code: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersonaRow {
    pub fn into_record(self) -> Result<Persona, ControlPlaneError> {
        let scope = self
            .scope
            .parse()
            .map_err(|e| corrupt("persona", self.id, e))?;
        Ok(Persona {
            id: self.id,
            sub_vertical_id: self.sub_vertical_id,
            key: self.key,
            name: self.name,
            mission: self.mission,
            decision_lens: self.decision_lens,
            scope,
            region_code: self.region_code,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow, Deserialize)]
pub(crate) struct PolicyRow {
    pub id: Uuid,
    pub persona_id: Uuid,
    pub policy_version: i32,
    pub status: String,
    pub allowed_intents: Vec<String>,
    pub forbidden_outputs: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub evidence_scope: Option<String>,
    pub memory_scope: Option<String>,
    pub cost_budget: serde_json::Value,
    pub latency_budget: serde_json::Value,
    pub escalation_rules: serde_json::Value,
    pub disclaimer_rules: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub staged_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl PolicyRow {
    pub fn into_record(self) -> Result<Policy, ControlPlaneError> {
        let id = self.id;
        let status = self.status.parse().map_err(|e| corrupt("policy", id, e))?;
        let cost_budget =
            serde_json::from_value(self.cost_budget).map_err(|e| corrupt("policy", id, e))?;
        let latency_budget =
            serde_json::from_value(self.latency_budget).map_err(|e| corrupt("policy", id, e))?;
        Ok(Policy {
            id,
            persona_id: self.persona_id,
            policy_version: self.policy_version,
            status,
            allowed_intents: self.allowed_intents,
            forbidden_outputs: self.forbidden_outputs,
            allowed_tools: self.allowed_tools,
            evidence_scope: self.evidence_scope,
            memory_scope: self.memory_scope,
            cost_budget,
            latency_budget,
            escalation_rules: self.escalation_rules,
            disclaimer_rules: self.disclaimer_rules,
            created_at: self.created_at,
            updated_at: self.updated_at,
            staged_at: self.staged_at,
            activated_at: self.activated_at,
            deprecated_at: self.deprecated_at,
        })
    }
}

#[derive(sqlx::FromRow, Deserialize)]
pub(crate) struct BindingRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workspace_id: Uuid,
    pub vertical_id: Uuid,
    pub sub_vertical_id: Uuid,
    pub persona_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BindingRow {
    pub fn into_record(self) -> WorkspaceBinding {
        WorkspaceBinding {
            id: self.id,
            tenant_id: TenantId::from_uuid(self.tenant_id),
            workspace_id: WorkspaceId::from_uuid(self.workspace_id),
            vertical_id: self.vertical_id,
            sub_vertical_id: self.sub_vertical_id,
            persona_id: self.persona_id,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AuditRow {
    pub id: Uuid,
    pub actor: String,
    pub tenant_id: Option<Uuid>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub request: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub previous_hash: String,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRow {
    pub fn into_record(self) -> Result<AuditEntry, ControlPlaneError> {
        let action = self.action.parse().map_err(|e| corrupt("audit_log", self.id, e))?;
        let target_type = self
            .target_type
            .parse()
            .map_err(|e| corrupt("audit_log", self.id, e))?;
        Ok(AuditEntry {
            id: self.id,
            actor: self.actor,
            tenant_id: self.tenant_id.map(TenantId::from_uuid),
            action,
            target_type,
            target_id: self.target_id,
            request: self.request,
            result: self.result,
            success: self.success,
            error_code: self.error_code,
            error_message: self.error_message,
            previous_hash: self.previous_hash,
            entry_hash: self.entry_hash,
            created_at: self.created_at,
        })
    }
}

/// Decode one `to_jsonb(row)` column.
pub(crate) fn from_json<R: serde::de::DeserializeOwned>(
    table: &str,
    value: serde_json::Value,
) -> Result<R, ControlPlaneError> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(table, error = %e, "unreadable snapshot column");
        ControlPlaneError::Internal(format!("unreadable {table} snapshot: {e}"))
    })
}
