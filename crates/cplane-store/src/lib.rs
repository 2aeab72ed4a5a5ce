//! # cplane-store: Control Plane Persistence
//!
//! Two async ports and their adapters:
//!
//! - [`ControlPlaneStore`]: the configuration hierarchy, policy chains and
//!   workspace bindings.
//! - [`AuditStore`]: the append-only, hash-chained audit log.
//!
//! [`MemoryStore`] backs development and tests. [`PgStore`] (feature
//! `postgres`, on by default) backs production.
//!
//! ## Atomicity
//!
//! Every method is one atomic unit. Policy transitions load the persona's
//! full chain under a lock, plan with [`cplane_state::PolicyChain`] and
//! write the plan before releasing it. Updates that deactivate a row count
//! the affected active bindings under the same lock.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use cplane_core::{
    AuditDraft, AuditEntry, AuditPage, AuditQuery, BindingPatch, ChainIntegrity, ControlPlaneError,
    Persona, PersonaPatch, SubVertical, SubVerticalPatch, TenantId, Updated, Vertical,
    VerticalPatch, WorkspaceBinding, WorkspaceId,
};
use cplane_state::{ActivationPlan, BindingSnapshot, EditPlan, Policy, PolicyPatch, StagePlan};

pub type StoreResult<T> = Result<T, ControlPlaneError>;

#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    // ── Verticals ──

    /// Conflict if the key is taken.
    async fn insert_vertical(&self, vertical: &Vertical) -> StoreResult<()>;
    async fn get_vertical(&self, id: Uuid) -> StoreResult<Option<Vertical>>;
    async fn update_vertical(
        &self,
        id: Uuid,
        patch: &VerticalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<Vertical>>;

    // ── Sub-verticals ──

    /// NotFound if the vertical is missing; Conflict if the key is taken
    /// within it.
    async fn insert_sub_vertical(&self, sub_vertical: &SubVertical) -> StoreResult<()>;
    async fn get_sub_vertical(&self, id: Uuid) -> StoreResult<Option<SubVertical>>;
    async fn update_sub_vertical(
        &self,
        id: Uuid,
        patch: &SubVerticalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<SubVertical>>;

    // ── Personas ──

    /// NotFound if the sub-vertical is missing; Conflict if the key is taken
    /// within it.
    async fn insert_persona(&self, persona: &Persona) -> StoreResult<()>;
    async fn get_persona(&self, id: Uuid) -> StoreResult<Option<Persona>>;
    /// The patched row is re-validated against the region hierarchy before
    /// it is written.
    async fn update_persona(
        &self,
        id: Uuid,
        patch: &PersonaPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<Persona>>;

    // ── Policies ──

    async fn create_initial_policy(
        &self,
        persona_id: Uuid,
        initial: &PolicyPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Policy>;
    async fn apply_policy_edit(
        &self,
        policy_id: Uuid,
        patch: &PolicyPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<EditPlan>;
    async fn stage_policy(&self, policy_id: Uuid, now: DateTime<Utc>) -> StoreResult<StagePlan>;
    async fn activate_policy(
        &self,
        policy_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<ActivationPlan>;
    async fn rollback_policy(
        &self,
        persona_id: Uuid,
        target_version: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<ActivationPlan>;
    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<Policy>>;
    /// Ascending version order. NotFound if the persona is missing.
    async fn list_policies(&self, persona_id: Uuid) -> StoreResult<Vec<Policy>>;

    // ── Workspace bindings ──

    /// Conflict if the (tenant, workspace) pair is already bound.
    async fn insert_binding(&self, binding: &WorkspaceBinding) -> StoreResult<()>;
    async fn get_binding(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> StoreResult<Option<WorkspaceBinding>>;
    async fn update_binding(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
        patch: &BindingPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<WorkspaceBinding>>;

    // ── Resolution ──

    /// One consistent read of the binding and everything it points at.
    async fn load_resolution_snapshot(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> StoreResult<Option<BindingSnapshot>>;

    /// Readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Link `draft` after the current chain head and persist it.
    async fn append_audit(&self, draft: AuditDraft) -> StoreResult<AuditEntry>;
    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<AuditPage>;
    /// Check the newest `limit` entries, the oldest of them against the hash
    /// of its predecessor.
    async fn verify_chain(&self, limit: u32) -> StoreResult<ChainIntegrity>;
}
