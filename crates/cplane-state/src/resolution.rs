//! # Binding Resolution
//!
//! Turns one joined read of `binding → vertical → sub-vertical → persona →
//! ACTIVE policy` into either a [`ResolvedConfig`] or the first failing
//! check. Checks run in a fixed order and stop at the first failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use cplane_core::{
    EntityType, Persona, PersonaScope, ResolutionFailure, ResolutionKind, SubVertical, TenantId,
    Vertical, WorkspaceBinding, WorkspaceId,
};

use crate::policy::{CostBudget, LatencyBudget, Policy, PolicyStatus};

/// Marker attached to every successful resolution.
pub const RESOLUTION_METHOD: &str = "workspace_binding";

/// Everything one resolution needs, read in a single consistent snapshot.
///
/// Joined rows are optional so a dangling reference reads as inactive
/// rather than aborting the read.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSnapshot {
    pub binding: WorkspaceBinding,
    pub vertical: Option<Vertical>,
    pub sub_vertical: Option<SubVertical>,
    pub persona: Option<Persona>,
    pub active_policy: Option<Policy>,
}

type Check = fn(&BindingSnapshot) -> bool;

fn binding_active(s: &BindingSnapshot) -> bool {
    s.binding.is_active
}

fn vertical_active(s: &BindingSnapshot) -> bool {
    s.vertical.as_ref().is_some_and(|v| v.is_active)
}

fn sub_vertical_active(s: &BindingSnapshot) -> bool {
    s.sub_vertical.as_ref().is_some_and(|sv| sv.is_active)
}

fn persona_active(s: &BindingSnapshot) -> bool {
    s.persona.as_ref().is_some_and(|p| p.is_active)
}

fn policy_active(s: &BindingSnapshot) -> bool {
    s.active_policy
        .as_ref()
        .is_some_and(|p| p.status == PolicyStatus::Active)
}

/// Evaluated top to bottom after the binding lookup itself.
const PIPELINE: &[(ResolutionKind, Check)] = &[
    (ResolutionKind::BindingInactive, binding_active),
    (ResolutionKind::VerticalInactive, vertical_active),
    (ResolutionKind::SubVerticalInactive, sub_vertical_active),
    (ResolutionKind::PersonaInactive, persona_active),
    (ResolutionKind::PolicyNotActive, policy_active),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedVertical {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub entity_type: EntityType,
    pub region_scope: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedSubVertical {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub default_agent: String,
    pub primary_entity_type: EntityType,
    pub related_entity_types: Vec<EntityType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedPersona {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub mission: Option<String>,
    pub decision_lens: Option<String>,
    pub scope: PersonaScope,
    pub region_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedPolicy {
    pub id: Uuid,
    pub policy_version: i32,
    pub status: PolicyStatus,
    pub allowed_intents: Vec<String>,
    pub forbidden_outputs: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub evidence_scope: Option<String>,
    pub memory_scope: Option<String>,
    pub cost_budget: CostBudget,
    pub latency_budget: LatencyBudget,
    pub escalation_rules: serde_json::Value,
    pub disclaimer_rules: serde_json::Value,
    pub activated_at: Option<DateTime<Utc>>,
}

/// The configuration a downstream service runs a workspace with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedConfig {
    pub tenant_id: TenantId,
    pub workspace_id: WorkspaceId,
    pub binding_id: Uuid,
    pub vertical: ResolvedVertical,
    pub sub_vertical: ResolvedSubVertical,
    pub persona: ResolvedPersona,
    pub policy: ResolvedPolicy,
    pub resolution_method: String,
}

/// Evaluate a snapshot for `(tenant_id, workspace_id)`.
///
/// `None`, or a snapshot whose binding belongs to another tenant or
/// workspace, resolves to `BINDING_NOT_FOUND`.
pub fn resolve(
    tenant_id: TenantId,
    workspace_id: WorkspaceId,
    snapshot: Option<BindingSnapshot>,
) -> Result<ResolvedConfig, ResolutionFailure> {
    let fail = |kind: ResolutionKind| ResolutionFailure {
        kind,
        tenant_id,
        workspace_id,
    };

    let snapshot = snapshot
        .filter(|s| s.binding.tenant_id == tenant_id && s.binding.workspace_id == workspace_id)
        .ok_or_else(|| fail(ResolutionKind::BindingNotFound))?;

    if let Some((kind, _)) = PIPELINE.iter().find(|(_, check)| !check(&snapshot)) {
        return Err(fail(*kind));
    }

    let BindingSnapshot {
        binding,
        vertical: Some(vertical),
        sub_vertical: Some(sub_vertical),
        persona: Some(persona),
        active_policy: Some(policy),
    } = snapshot
    else {
        return Err(fail(ResolutionKind::PolicyNotActive));
    };

    Ok(ResolvedConfig {
        tenant_id,
        workspace_id,
        binding_id: binding.id,
        vertical: ResolvedVertical {
            id: vertical.id,
            key: vertical.key,
            name: vertical.name,
            entity_type: vertical.entity_type,
            region_scope: vertical.region_scope,
        },
        sub_vertical: ResolvedSubVertical {
            id: sub_vertical.id,
            key: sub_vertical.key,
            name: sub_vertical.name,
            default_agent: sub_vertical.default_agent,
            primary_entity_type: sub_vertical.primary_entity_type,
            related_entity_types: sub_vertical.related_entity_types,
        },
        persona: ResolvedPersona {
            id: persona.id,
            key: persona.key,
            name: persona.name,
            mission: persona.mission,
            decision_lens: persona.decision_lens,
            scope: persona.scope,
            region_code: persona.region_code,
        },
        policy: ResolvedPolicy {
            id: policy.id,
            policy_version: policy.policy_version,
            status: policy.status,
            allowed_intents: policy.allowed_intents,
            forbidden_outputs: policy.forbidden_outputs,
            allowed_tools: policy.allowed_tools,
            evidence_scope: policy.evidence_scope,
            memory_scope: policy.memory_scope,
            cost_budget: policy.cost_budget,
            latency_budget: policy.latency_budget,
            escalation_rules: policy.escalation_rules,
            disclaimer_rules: policy.disclaimer_rules,
            activated_at: policy.activated_at,
        },
        resolution_method: RESOLUTION_METHOD.to_string(),
    })
}
