//! # Policy Lifecycle Manager
//!
//! Drives the `DRAFT -> STAGED -> ACTIVE -> DEPRECATED` lifecycle of a
//! persona's policy chain. Planning lives in [`cplane_state::PolicyChain`];
//! the store runs each plan against the locked chain. Every transition is
//! audited with the before and after state and counted in
//! `cplane_policy_transitions_total{action, outcome}`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use cplane_core::{Actor, AuditAction, ControlPlaneError, EntityKind};
use cplane_state::{ActivationPlan, EditKind, Policy, PolicyChange, PolicyPatch};
use cplane_store::ControlPlaneStore;

use crate::audit::{snapshot, AuditLog};
use crate::input::{validate_policy_patch, RollbackInput};

type Result<T> = std::result::Result<T, ControlPlaneError>;

fn count_transition<T>(action: AuditAction, outcome: &Result<T>) {
    let outcome = match outcome {
        Ok(_) => "success",
        Err(err) => err.code(),
    };
    metrics::counter!(
        "cplane_policy_transitions_total",
        "action" => action.as_str(),
        "outcome" => outcome,
    )
    .increment(1);
}

fn change(change: &PolicyChange) -> Value {
    json!({ "before": snapshot(&change.before), "after": snapshot(&change.after) })
}

fn activation_result(plan: &ActivationPlan) -> (Option<String>, Value) {
    let result = json!({
        "activated": change(&plan.activated),
        "deprecated": plan.deprecated.as_ref().map(change),
    });
    (Some(plan.activated.after.id.to_string()), result)
}

#[derive(Clone)]
pub struct PolicyLifecycleManager {
    store: Arc<dyn ControlPlaneStore>,
    audit: AuditLog,
}

impl PolicyLifecycleManager {
    pub fn new(store: Arc<dyn ControlPlaneStore>, audit: AuditLog) -> Self {
        Self { store, audit }
    }

    /// Start a persona's chain at version 1 in DRAFT.
    ///
    /// Conflict if the persona already has a policy; edit it instead.
    pub async fn create(
        &self,
        actor: &Actor,
        persona_id: Uuid,
        initial: Option<PolicyPatch>,
    ) -> Result<Policy> {
        let initial = initial.unwrap_or_default();
        let action = AuditAction::PolicyCreate;
        let audited = self.audit.begin(
            actor,
            action,
            EntityKind::Policy,
            None,
            json!({ "persona_id": persona_id, "initial": snapshot(&initial) }),
        );
        let outcome = async {
            validate_policy_patch(&initial)?;
            let policy = self
                .store
                .create_initial_policy(persona_id, &initial, Utc::now())
                .await?;
            tracing::info!(
                policy_id = %policy.id,
                persona_id = %persona_id,
                actor = %actor.id,
                "policy chain started"
            );
            Ok::<_, ControlPlaneError>(policy)
        }
        .await;
        count_transition(action, &outcome);
        audited
            .finish(outcome, |p| (Some(p.id.to_string()), snapshot(p)))
            .await
    }

    /// Edit a DRAFT in place, or fork any other status into a new DRAFT
    /// version carrying the unpatched fields.
    pub async fn edit(&self, actor: &Actor, policy_id: Uuid, patch: PolicyPatch) -> Result<Policy> {
        let action = AuditAction::PolicyEdit;
        let audited = self.audit.begin(
            actor,
            action,
            EntityKind::Policy,
            Some(policy_id.to_string()),
            snapshot(&patch),
        );
        let outcome = async {
            validate_policy_patch(&patch)?;
            let plan = self
                .store
                .apply_policy_edit(policy_id, &patch, Utc::now())
                .await?;
            tracing::info!(
                policy_id = %plan.result.id,
                source_id = %policy_id,
                version = plan.result.policy_version,
                new_version = matches!(plan.kind, EditKind::NewVersion),
                actor = %actor.id,
                "policy edited"
            );
            Ok::<_, ControlPlaneError>(plan)
        }
        .await;
        count_transition(action, &outcome);
        audited
            .finish(outcome, |plan| {
                let result = json!({
                    "before": snapshot(&plan.source),
                    "after": snapshot(&plan.result),
                    "new_version": matches!(plan.kind, EditKind::NewVersion),
                });
                (Some(plan.result.id.to_string()), result)
            })
            .await
            .map(|plan| plan.result)
    }

    /// DRAFT -> STAGED. Staging a STAGED policy changes nothing.
    pub async fn stage(&self, actor: &Actor, policy_id: Uuid) -> Result<Policy> {
        let action = AuditAction::PolicyStage;
        let audited = self.audit.begin(
            actor,
            action,
            EntityKind::Policy,
            Some(policy_id.to_string()),
            json!({ "policy_id": policy_id }),
        );
        let outcome = self.store.stage_policy(policy_id, Utc::now()).await;
        if let Ok(plan) = &outcome {
            tracing::info!(
                policy_id = %policy_id,
                version = plan.after.policy_version,
                noop = plan.noop,
                actor = %actor.id,
                "policy staged"
            );
        }
        count_transition(action, &outcome);
        audited
            .finish(outcome, |plan| {
                let result = json!({
                    "before": snapshot(&plan.before),
                    "after": snapshot(&plan.after),
                    "noop": plan.noop,
                });
                (None, result)
            })
            .await
            .map(|plan| plan.after)
    }

    /// STAGED -> ACTIVE, deprecating the previous ACTIVE version.
    pub async fn activate(&self, actor: &Actor, policy_id: Uuid) -> Result<Policy> {
        let action = AuditAction::PolicyActivate;
        let audited = self.audit.begin(
            actor,
            action,
            EntityKind::Policy,
            Some(policy_id.to_string()),
            json!({ "policy_id": policy_id }),
        );
        let outcome = self.store.activate_policy(policy_id, Utc::now()).await;
        if let Ok(plan) = &outcome {
            tracing::info!(
                policy_id = %policy_id,
                version = plan.activated.after.policy_version,
                deprecated = ?plan.deprecated.as_ref().map(|d| d.after.policy_version),
                actor = %actor.id,
                "policy activated"
            );
        }
        count_transition(action, &outcome);
        audited
            .finish(outcome, activation_result)
            .await
            .map(|plan| plan.activated.after)
    }

    /// Re-activate the DEPRECATED row at `target_version`.
    pub async fn rollback(
        &self,
        actor: &Actor,
        persona_id: Uuid,
        input: RollbackInput,
    ) -> Result<Policy> {
        let action = AuditAction::PolicyRollback;
        let audited = self.audit.begin(
            actor,
            action,
            EntityKind::Policy,
            None,
            json!({ "persona_id": persona_id, "target_version": input.target_version }),
        );
        let outcome = async {
            let target_version = input.target_version()?;
            let plan = self
                .store
                .rollback_policy(persona_id, target_version, Utc::now())
                .await?;
            tracing::info!(
                persona_id = %persona_id,
                version = target_version,
                deprecated = ?plan.deprecated.as_ref().map(|d| d.after.policy_version),
                actor = %actor.id,
                "policy rolled back"
            );
            Ok::<_, ControlPlaneError>(plan)
        }
        .await;
        count_transition(action, &outcome);
        audited
            .finish(outcome, activation_result)
            .await
            .map(|plan| plan.activated.after)
    }

    pub async fn get(&self, policy_id: Uuid) -> Result<Policy> {
        self.store
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Policy, policy_id))
    }

    /// Every version of the persona's chain, ascending.
    pub async fn versions(&self, persona_id: Uuid) -> Result<Vec<Policy>> {
        self.store.list_policies(persona_id).await
    }
}
