//! # Entity Store
//!
//! Create, update and read the configuration hierarchy and workspace
//! bindings. Inputs are validated before any state is read; immutable
//! fields are compared against the current row; every mutation is audited.
//!
//! Deactivating a vertical, sub-vertical or persona still proceeds when
//! active bindings point at it. The affected count (blast radius) is
//! counted by the store under the write lock, logged at `warn` and recorded
//! in the audit result.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use cplane_core::{
    Actor, AuditAction, BlastRadius, ControlPlaneError, EntityKind, Persona, SubVertical, TenantId,
    Updated, ValidationError, Vertical, WorkspaceBinding, WorkspaceId,
};
use cplane_store::ControlPlaneStore;

use crate::audit::{snapshot, AuditLog};
use crate::input::{
    BindingTarget, CreateBindingInput, CreatePersonaInput, CreateSubVerticalInput,
    CreateVerticalInput, UpdateBindingInput, UpdatePersonaInput, UpdateSubVerticalInput,
    UpdateVerticalInput,
};

type Result<T> = std::result::Result<T, ControlPlaneError>;

fn created<T: Serialize>(id: Uuid, record: &T) -> (Option<String>, Value) {
    (Some(id.to_string()), snapshot(record))
}

fn updated<T: Serialize>(id: Uuid, outcome: &Updated<T>) -> (Option<String>, Value) {
    let mut result = json!({
        "before": snapshot(&outcome.before),
        "after": snapshot(&outcome.after),
    });
    if let Some(radius) = outcome.blast_radius {
        result["blast_radius"] = json!({
            "active_bindings": radius.active_bindings,
            "warning": format!(
                "deactivation affects {} active workspace binding(s)",
                radius.active_bindings
            ),
        });
    }
    (Some(id.to_string()), result)
}

fn warn_blast_radius(entity: EntityKind, id: Uuid, radius: Option<BlastRadius>) {
    if let Some(radius) = radius.filter(|r| r.active_bindings > 0) {
        tracing::warn!(
            entity = %entity,
            id = %id,
            active_bindings = radius.active_bindings,
            "deactivation affects active workspace bindings"
        );
    }
}

#[derive(Clone)]
pub struct EntityStore {
    store: Arc<dyn ControlPlaneStore>,
    audit: AuditLog,
}

impl EntityStore {
    pub fn new(store: Arc<dyn ControlPlaneStore>, audit: AuditLog) -> Self {
        Self { store, audit }
    }

    // -----------------------------------------------------------------------
    // Verticals
    // -----------------------------------------------------------------------

    pub async fn create_vertical(&self, actor: &Actor, input: CreateVerticalInput) -> Result<Vertical> {
        let audited = self.audit.begin(
            actor,
            AuditAction::VerticalCreate,
            EntityKind::Vertical,
            None,
            snapshot(&input),
        );
        let outcome = async {
            let vertical = input.into_record(Utc::now())?;
            self.store.insert_vertical(&vertical).await?;
            tracing::info!(id = %vertical.id, key = %vertical.key, actor = %actor.id, "vertical created");
            Ok::<_, ControlPlaneError>(vertical)
        }
        .await;
        audited.finish(outcome, |v| created(v.id, v)).await
    }

    pub async fn update_vertical(
        &self,
        actor: &Actor,
        id: Uuid,
        input: UpdateVerticalInput,
    ) -> Result<Updated<Vertical>> {
        let audited = self.audit.begin(
            actor,
            AuditAction::VerticalUpdate,
            EntityKind::Vertical,
            Some(id.to_string()),
            snapshot(&input),
        );
        let outcome = async {
            let current = self.get_vertical(id).await?;
            let patch = input.into_patch(&current)?;
            let outcome = self.store.update_vertical(id, &patch, Utc::now()).await?;
            tracing::info!(id = %id, actor = %actor.id, "vertical updated");
            warn_blast_radius(EntityKind::Vertical, id, outcome.blast_radius);
            Ok::<_, ControlPlaneError>(outcome)
        }
        .await;
        audited.finish(outcome, |u| updated(id, u)).await
    }

    pub async fn get_vertical(&self, id: Uuid) -> Result<Vertical> {
        self.store
            .get_vertical(id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Vertical, id))
    }

    // -----------------------------------------------------------------------
    // Sub-verticals
    // -----------------------------------------------------------------------

    pub async fn create_sub_vertical(
        &self,
        actor: &Actor,
        vertical_id: Uuid,
        input: CreateSubVerticalInput,
    ) -> Result<SubVertical> {
        let audited = self.audit.begin(
            actor,
            AuditAction::SubVerticalCreate,
            EntityKind::SubVertical,
            None,
            json!({ "vertical_id": vertical_id, "input": snapshot(&input) }),
        );
        let outcome = async {
            let sub_vertical = input.into_record(vertical_id, Utc::now())?;
            self.store.insert_sub_vertical(&sub_vertical).await?;
            tracing::info!(
                id = %sub_vertical.id,
                vertical_id = %vertical_id,
                key = %sub_vertical.key,
                actor = %actor.id,
                "sub-vertical created"
            );
            Ok::<_, ControlPlaneError>(sub_vertical)
        }
        .await;
        audited.finish(outcome, |sv| created(sv.id, sv)).await
    }

    pub async fn update_sub_vertical(
        &self,
        actor: &Actor,
        id: Uuid,
        input: UpdateSubVerticalInput,
    ) -> Result<Updated<SubVertical>> {
        let audited = self.audit.begin(
            actor,
            AuditAction::SubVerticalUpdate,
            EntityKind::SubVertical,
            Some(id.to_string()),
            snapshot(&input),
        );
        let outcome = async {
            let current = self.get_sub_vertical(id).await?;
            let patch = input.into_patch(&current)?;
            let outcome = self.store.update_sub_vertical(id, &patch, Utc::now()).await?;
            tracing::info!(id = %id, actor = %actor.id, "sub-vertical updated");
            warn_blast_radius(EntityKind::SubVertical, id, outcome.blast_radius);
            Ok::<_, ControlPlaneError>(outcome)
        }
        .await;
        audited.finish(outcome, |u| updated(id, u)).await
    }

    pub async fn get_sub_vertical(&self, id: Uuid) -> Result<SubVertical> {
        self.store
            .get_sub_vertical(id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::SubVertical, id))
    }

    // -----------------------------------------------------------------------
    // Personas
    // -----------------------------------------------------------------------

    pub async fn create_persona(
        &self,
        actor: &Actor,
        sub_vertical_id: Uuid,
        input: CreatePersonaInput,
    ) -> Result<Persona> {
        let audited = self.audit.begin(
            actor,
            AuditAction::PersonaCreate,
            EntityKind::Persona,
            None,
            json!({ "sub_vertical_id": sub_vertical_id, "input": snapshot(&input) }),
        );
        let outcome = async {
            let persona = input.into_record(sub_vertical_id, Utc::now())?;
            self.store.insert_persona(&persona).await?;
            tracing::info!(
                id = %persona.id,
                sub_vertical_id = %sub_vertical_id,
                key = %persona.key,
                scope = %persona.scope,
                actor = %actor.id,
                "persona created"
            );
            Ok::<_, ControlPlaneError>(persona)
        }
        .await;
        audited.finish(outcome, |p| created(p.id, p)).await
    }

    pub async fn update_persona(
        &self,
        actor: &Actor,
        id: Uuid,
        input: UpdatePersonaInput,
    ) -> Result<Updated<Persona>> {
        let audited = self.audit.begin(
            actor,
            AuditAction::PersonaUpdate,
            EntityKind::Persona,
            Some(id.to_string()),
            snapshot(&input),
        );
        let outcome = async {
            let current = self.get_persona(id).await?;
            let patch = input.into_patch(&current)?;
            let outcome = self.store.update_persona(id, &patch, Utc::now()).await?;
            tracing::info!(id = %id, actor = %actor.id, "persona updated");
            warn_blast_radius(EntityKind::Persona, id, outcome.blast_radius);
            Ok::<_, ControlPlaneError>(outcome)
        }
        .await;
        audited.finish(outcome, |u| updated(id, u)).await
    }

    pub async fn get_persona(&self, id: Uuid) -> Result<Persona> {
        self.store
            .get_persona(id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Persona, id))
    }

    // -----------------------------------------------------------------------
    // Workspace bindings
    // -----------------------------------------------------------------------

    /// The sub-vertical must belong to the vertical and the persona to the
    /// sub-vertical.
    async fn check_chain(&self, target: BindingTarget) -> Result<()> {
        let vertical = self.get_vertical(target.vertical_id).await?;
        let sub_vertical = self.get_sub_vertical(target.sub_vertical_id).await?;
        if sub_vertical.vertical_id != vertical.id {
            return Err(ValidationError::InvalidValue {
                field: "sub_vertical_id",
                reason: format!("sub-vertical {} does not belong to vertical {}", sub_vertical.id, vertical.id),
            }
            .into());
        }
        let persona = self.get_persona(target.persona_id).await?;
        if persona.sub_vertical_id != sub_vertical.id {
            return Err(ValidationError::InvalidValue {
                field: "persona_id",
                reason: format!("persona {} does not belong to sub-vertical {}", persona.id, sub_vertical.id),
            }
            .into());
        }
        Ok(())
    }

    /// Bind a workspace of the caller's tenant.
    pub async fn create_binding(
        &self,
        actor: &Actor,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
        input: CreateBindingInput,
    ) -> Result<WorkspaceBinding> {
        let audited = self.audit.begin(
            actor,
            AuditAction::BindingCreate,
            EntityKind::WorkspaceBinding,
            None,
            json!({
                "tenant_id": tenant_id,
                "workspace_id": workspace_id,
                "input": snapshot(&input),
            }),
        );
        let outcome = async {
            let target = input.target()?;
            self.check_chain(target).await?;
            let now = Utc::now();
            let binding = WorkspaceBinding {
                id: Uuid::new_v4(),
                tenant_id,
                workspace_id,
                vertical_id: target.vertical_id,
                sub_vertical_id: target.sub_vertical_id,
                persona_id: target.persona_id,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            self.store.insert_binding(&binding).await?;
            tracing::info!(
                id = %binding.id,
                tenant_id = %tenant_id,
                workspace_id = %workspace_id,
                persona_id = %binding.persona_id,
                actor = %actor.id,
                "workspace binding created"
            );
            Ok::<_, ControlPlaneError>(binding)
        }
        .await;
        audited.finish(outcome, |b| created(b.id, b)).await
    }

    pub async fn update_binding(
        &self,
        actor: &Actor,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
        input: UpdateBindingInput,
    ) -> Result<Updated<WorkspaceBinding>> {
        let audited = self.audit.begin(
            actor,
            AuditAction::BindingUpdate,
            EntityKind::WorkspaceBinding,
            None,
            json!({
                "tenant_id": tenant_id,
                "workspace_id": workspace_id,
                "input": snapshot(&input),
            }),
        );
        let outcome = async {
            let current = self.get_binding(tenant_id, workspace_id).await?;
            let patch = input.into_patch();
            let rebinds = patch.vertical_id.is_some()
                || patch.sub_vertical_id.is_some()
                || patch.persona_id.is_some();
            if rebinds {
                let mut merged = current.clone();
                merged.apply(&patch, current.updated_at);
                self.check_chain(BindingTarget {
                    vertical_id: merged.vertical_id,
                    sub_vertical_id: merged.sub_vertical_id,
                    persona_id: merged.persona_id,
                })
                .await?;
            }
            let outcome = self
                .store
                .update_binding(tenant_id, workspace_id, &patch, Utc::now())
                .await?;
            tracing::info!(
                id = %outcome.after.id,
                tenant_id = %tenant_id,
                workspace_id = %workspace_id,
                actor = %actor.id,
                "workspace binding updated"
            );
            Ok::<_, ControlPlaneError>(outcome)
        }
        .await;
        audited.finish(outcome, |u| updated(u.after.id, u)).await
    }

    pub async fn get_binding(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> Result<WorkspaceBinding> {
        self.store
            .get_binding(tenant_id, workspace_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::WorkspaceBinding, workspace_id))
    }
}
