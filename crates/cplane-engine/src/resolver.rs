//! # Binding Resolver
//!
//! Resolves a `(tenant, workspace)` pair to its effective configuration.
//! The store returns one consistent snapshot of the binding chain and the
//! predicate pipeline in [`cplane_state::resolve`] decides the outcome.
//!
//! A snapshot read that fails with an internal error is retried up to the
//! configured number of times. Business outcomes are never retried.

use std::sync::Arc;

use serde_json::json;

use cplane_core::{
    Actor, AuditAction, AuditDraft, ControlPlaneError, EntityKind, TenantId, WorkspaceId,
};
use cplane_state::{resolve, BindingSnapshot, ResolvedConfig};
use cplane_store::ControlPlaneStore;

use crate::audit::AuditLog;

#[derive(Clone)]
pub struct BindingResolver {
    store: Arc<dyn ControlPlaneStore>,
    audit: AuditLog,
    read_retries: u32,
}

impl BindingResolver {
    pub fn new(store: Arc<dyn ControlPlaneStore>, audit: AuditLog, read_retries: u32) -> Self {
        Self {
            store,
            audit,
            read_retries,
        }
    }

    async fn load_snapshot(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> Result<Option<BindingSnapshot>, ControlPlaneError> {
        let mut attempt = 0;
        loop {
            match self.store.load_resolution_snapshot(tenant_id, workspace_id).await {
                Err(err) if err.is_retryable() && attempt < self.read_retries => {
                    attempt += 1;
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        workspace_id = %workspace_id,
                        attempt,
                        error = %err,
                        "resolution read failed, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    /// `tenant_id` must come from the verified caller, never from the
    /// request payload.
    pub async fn resolve(
        &self,
        actor: &Actor,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> Result<ResolvedConfig, ControlPlaneError> {
        let outcome = self
            .load_snapshot(tenant_id, workspace_id)
            .await
            .and_then(|snapshot| {
                resolve(tenant_id, workspace_id, snapshot).map_err(ControlPlaneError::Resolution)
            });

        match &outcome {
            Ok(config) => {
                metrics::counter!("cplane_resolutions_total", "outcome" => "success").increment(1);
                tracing::debug!(
                    tenant_id = %tenant_id,
                    workspace_id = %workspace_id,
                    persona_id = %config.persona.id,
                    policy_version = config.policy.policy_version,
                    "workspace resolved"
                );
            }
            Err(err) => {
                metrics::counter!("cplane_resolutions_total", "outcome" => err.code()).increment(1);
                tracing::warn!(
                    tenant_id = %tenant_id,
                    workspace_id = %workspace_id,
                    code = err.code(),
                    "workspace resolution failed"
                );
                let draft = AuditDraft::failure(
                    actor,
                    AuditAction::ResolutionFailed,
                    EntityKind::WorkspaceBinding,
                    Some(workspace_id.to_string()),
                    json!({ "tenant_id": tenant_id, "workspace_id": workspace_id }),
                    err,
                );
                self.audit.record(draft).await;
            }
        }
        outcome
    }
}
