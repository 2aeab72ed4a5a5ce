//! # Policy Lifecycle
//!
//! A policy is a versioned permission set owned by a persona. Versions form a
//! chain; each row moves through:
//!
//! ```text
//! DRAFT ──stage──▶ STAGED ──activate──▶ ACTIVE ──(next activation)──▶ DEPRECATED
//!                                          ▲                              │
//!                                          └───────────rollback───────────┘
//! ```
//!
//! Editing a DRAFT updates it in place. Editing any other row forks a new
//! DRAFT at `max(version) + 1`; the edited row is left untouched.
//!
//! ## Chain invariants
//!
//! - At most one ACTIVE row per persona.
//! - `policy_version` values are unique and never reused.
//!
//! [`PolicyChain`] computes plans; the caller persists them atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use cplane_core::model::deserialize_some;
use cplane_core::{ControlPlaneError, EmptyPolicyField, EntityKind};

/// Lifecycle state of one policy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    Draft,
    Staged,
    Active,
    Deprecated,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Staged => "STAGED",
            Self::Active => "ACTIVE",
            Self::Deprecated => "DEPRECATED",
        }
    }
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "STAGED" => Ok(Self::Staged),
            "ACTIVE" => Ok(Self::Active),
            "DEPRECATED" => Ok(Self::Deprecated),
            other => Err(format!("unknown policy status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CostBudget {
    pub max_tokens_per_request: Option<u32>,
    pub max_cost_cents_per_request: Option<u32>,
    pub monthly_cap_cents: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LatencyBudget {
    pub target_p95_ms: Option<u32>,
    pub timeout_ms: Option<u32>,
}

/// One version of a persona's policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    pub id: Uuid,
    pub persona_id: Uuid,
    pub policy_version: i32,
    pub status: PolicyStatus,
    pub allowed_intents: Vec<String>,
    pub forbidden_outputs: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub evidence_scope: Option<String>,
    pub memory_scope: Option<String>,
    pub cost_budget: CostBudget,
    pub latency_budget: LatencyBudget,
    /// Owned by the downstream reasoning service; stored verbatim.
    pub escalation_rules: serde_json::Value,
    pub disclaimer_rules: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub staged_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// A fresh DRAFT carrying `patch` over empty defaults.
    pub fn new_draft(persona_id: Uuid, version: i32, patch: &PolicyPatch, now: DateTime<Utc>) -> Self {
        let mut policy = Self {
            id: Uuid::new_v4(),
            persona_id,
            policy_version: version,
            status: PolicyStatus::Draft,
            allowed_intents: Vec::new(),
            forbidden_outputs: Vec::new(),
            allowed_tools: Vec::new(),
            evidence_scope: None,
            memory_scope: None,
            cost_budget: CostBudget::default(),
            latency_budget: LatencyBudget::default(),
            escalation_rules: serde_json::json!({}),
            disclaimer_rules: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            staged_at: None,
            activated_at: None,
            deprecated_at: None,
        };
        patch.apply(&mut policy);
        policy
    }

    /// A new DRAFT at `version` carrying this row's permission set.
    fn fork(&self, version: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy_version: version,
            status: PolicyStatus::Draft,
            created_at: now,
            updated_at: now,
            staged_at: None,
            activated_at: None,
            deprecated_at: None,
            ..self.clone()
        }
    }

    /// EMP-001 is checked before EMP-002.
    pub fn check_not_empty(&self) -> Result<(), ControlPlaneError> {
        if self.allowed_intents.is_empty() {
            return Err(ControlPlaneError::EmptyPolicy(EmptyPolicyField::AllowedIntents));
        }
        if self.allowed_tools.is_empty() {
            return Err(ControlPlaneError::EmptyPolicy(EmptyPolicyField::AllowedTools));
        }
        Ok(())
    }
}

/// Editable policy fields. `None` leaves a field as it is; an explicit
/// `null` clears `evidence_scope` or `memory_scope`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PolicyPatch {
    pub allowed_intents: Option<Vec<String>>,
    pub forbidden_outputs: Option<Vec<String>>,
    pub allowed_tools: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub evidence_scope: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub memory_scope: Option<Option<String>>,
    pub cost_budget: Option<CostBudget>,
    pub latency_budget: Option<LatencyBudget>,
    pub escalation_rules: Option<serde_json::Value>,
    pub disclaimer_rules: Option<serde_json::Value>,
}

impl PolicyPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, policy: &mut Policy) {
        if let Some(v) = &self.allowed_intents {
            policy.allowed_intents = v.clone();
        }
        if let Some(v) = &self.forbidden_outputs {
            policy.forbidden_outputs = v.clone();
        }
        if let Some(v) = &self.allowed_tools {
            policy.allowed_tools = v.clone();
        }
        if let Some(v) = &self.evidence_scope {
            policy.evidence_scope = v.clone();
        }
        if let Some(v) = &self.memory_scope {
            policy.memory_scope = v.clone();
        }
        if let Some(v) = &self.cost_budget {
            policy.cost_budget = v.clone();
        }
        if let Some(v) = &self.latency_budget {
            policy.latency_budget = v.clone();
        }
        if let Some(v) = &self.escalation_rules {
            policy.escalation_rules = v.clone();
        }
        if let Some(v) = &self.disclaimer_rules {
            policy.disclaimer_rules = v.clone();
        }
    }
}

/// A row as it was and as it should be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyChange {
    pub before: Policy,
    pub after: Policy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// The DRAFT row was updated; write `result` over `source`.
    InPlace,
    /// Insert `result` as a new row; `source` is untouched.
    NewVersion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditPlan {
    pub source: Policy,
    pub result: Policy,
    pub kind: EditKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub before: Policy,
    pub after: Policy,
    /// The policy was already STAGED; nothing to write.
    pub noop: bool,
}

/// Rows to write for an activation or rollback, in order: `deprecated`
/// first, then `activated`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationPlan {
    pub activated: PolicyChange,
    pub deprecated: Option<PolicyChange>,
}

impl ActivationPlan {
    pub fn writes(&self) -> impl Iterator<Item = &Policy> {
        self.deprecated
            .iter()
            .map(|c| &c.after)
            .chain(std::iter::once(&self.activated.after))
    }
}

/// One persona's full version chain, ordered by version.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyChain {
    persona_id: Uuid,
    policies: Vec<Policy>,
}

impl PolicyChain {
    pub fn new(persona_id: Uuid, mut policies: Vec<Policy>) -> Self {
        policies.sort_by_key(|p| p.policy_version);
        Self {
            persona_id,
            policies,
        }
    }

    pub fn persona_id(&self) -> Uuid {
        self.persona_id
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn into_policies(self) -> Vec<Policy> {
        self.policies
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn active(&self) -> Option<&Policy> {
        self.policies
            .iter()
            .find(|p| p.status == PolicyStatus::Active)
    }

    pub fn get(&self, policy_id: Uuid) -> Option<&Policy> {
        self.policies.iter().find(|p| p.id == policy_id)
    }

    pub fn by_version(&self, version: i32) -> Option<&Policy> {
        self.policies.iter().find(|p| p.policy_version == version)
    }

    pub fn next_version(&self) -> i32 {
        self.policies
            .iter()
            .map(|p| p.policy_version)
            .max()
            .map_or(1, |v| v + 1)
    }

    /// Version 1 for a persona with no chain yet.
    pub fn plan_initial(&self, initial: &PolicyPatch, now: DateTime<Utc>) -> Result<Policy, ControlPlaneError> {
        if !self.is_empty() {
            return Err(ControlPlaneError::conflict(
                EntityKind::Policy,
                format!(
                    "persona {} already has a policy chain; edit an existing version instead",
                    self.persona_id
                ),
            ));
        }
        Ok(Policy::new_draft(self.persona_id, 1, initial, now))
    }

    pub fn plan_edit(
        &self,
        policy_id: Uuid,
        patch: &PolicyPatch,
        now: DateTime<Utc>,
    ) -> Result<EditPlan, ControlPlaneError> {
        let source = self.require(policy_id)?;
        if source.status == PolicyStatus::Draft {
            let mut result = source.clone();
            patch.apply(&mut result);
            result.updated_at = now;
            return Ok(EditPlan {
                source: source.clone(),
                result,
                kind: EditKind::InPlace,
            });
        }
        let mut result = source.fork(self.next_version(), now);
        patch.apply(&mut result);
        Ok(EditPlan {
            source: source.clone(),
            result,
            kind: EditKind::NewVersion,
        })
    }

    pub fn plan_stage(&self, policy_id: Uuid, now: DateTime<Utc>) -> Result<StagePlan, ControlPlaneError> {
        let before = self.require(policy_id)?;
        match before.status {
            PolicyStatus::Staged => Ok(StagePlan {
                before: before.clone(),
                after: before.clone(),
                noop: true,
            }),
            PolicyStatus::Draft => {
                before.check_not_empty()?;
                let mut after = before.clone();
                after.status = PolicyStatus::Staged;
                after.staged_at = Some(now);
                after.updated_at = now;
                Ok(StagePlan {
                    before: before.clone(),
                    after,
                    noop: false,
                })
            }
            other => Err(ControlPlaneError::invalid_transition(
                other,
                PolicyStatus::Staged,
                "only DRAFT policies can be staged",
            )),
        }
    }

    pub fn plan_activation(
        &self,
        policy_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ActivationPlan, ControlPlaneError> {
        let target = self.require(policy_id)?;
        if target.status != PolicyStatus::Staged {
            return Err(ControlPlaneError::invalid_transition(
                target.status,
                PolicyStatus::Active,
                "only STAGED policies can be activated",
            ));
        }
        Ok(self.swap_active(target, now))
    }

    /// Re-activate the DEPRECATED row at `target_version`.
    pub fn plan_rollback(
        &self,
        target_version: i32,
        now: DateTime<Utc>,
    ) -> Result<ActivationPlan, ControlPlaneError> {
        let target = self.by_version(target_version).ok_or_else(|| {
            ControlPlaneError::not_found(
                EntityKind::Policy,
                format!("persona {} version {target_version}", self.persona_id),
            )
        })?;
        if target.status != PolicyStatus::Deprecated {
            return Err(ControlPlaneError::invalid_transition(
                target.status,
                PolicyStatus::Active,
                "rollback targets a DEPRECATED version",
            ));
        }
        target.check_not_empty()?;
        Ok(self.swap_active(target, now))
    }

    fn swap_active(&self, target: &Policy, now: DateTime<Utc>) -> ActivationPlan {
        let deprecated = self.active().map(|current| {
            let mut after = current.clone();
            after.status = PolicyStatus::Deprecated;
            after.deprecated_at = Some(now);
            after.updated_at = now;
            PolicyChange {
                before: current.clone(),
                after,
            }
        });
        let mut after = target.clone();
        after.status = PolicyStatus::Active;
        after.activated_at = Some(now);
        after.deprecated_at = None;
        after.updated_at = now;
        ActivationPlan {
            activated: PolicyChange {
                before: target.clone(),
                after,
            },
            deprecated,
        }
    }

    /// Replace the row with the same id, or append it.
    pub fn upsert(&mut self, policy: Policy) {
        match self.policies.iter_mut().find(|p| p.id == policy.id) {
            Some(slot) => *slot = policy,
            None => {
                self.policies.push(policy);
                self.policies.sort_by_key(|p| p.policy_version);
            }
        }
    }

    pub fn apply_activation(&mut self, plan: &ActivationPlan) {
        for policy in plan.writes() {
            self.upsert(policy.clone());
        }
    }

    /// Verify the chain invariants, returning a description of the first breach.
    pub fn check_invariants(&self) -> Result<(), String> {
        let active = self
            .policies
            .iter()
            .filter(|p| p.status == PolicyStatus::Active)
            .count();
        if active > 1 {
            return Err(format!(
                "persona {} has {active} ACTIVE policies",
                self.persona_id
            ));
        }
        for pair in self.policies.windows(2) {
            if pair[0].policy_version >= pair[1].policy_version {
                return Err(format!(
                    "persona {} reuses policy_version {}",
                    self.persona_id, pair[1].policy_version
                ));
            }
        }
        if let Some(p) = self.policies.iter().find(|p| p.persona_id != self.persona_id) {
            return Err(format!("policy {} belongs to another persona", p.id));
        }
        Ok(())
    }

    fn require(&self, policy_id: Uuid) -> Result<&Policy, ControlPlaneError> {
        self.get(policy_id)
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Policy, policy_id))
    }
}
