//! # Postgres Adapter
//!
//! Persists the control plane to PostgreSQL via SQLx. Migrations under
//! `migrations/` are embedded and applied on connect.
//!
//! Constraint backstops mirror the planner invariants: a partial unique
//! index allows one ACTIVE policy per persona, `(persona_id,
//! policy_version)` is unique, and each `(tenant_id, workspace_id)` has one
//! binding.

mod audit;
mod entities;
mod policies;
mod rows;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use cplane_core::{
    AuditDraft, AuditEntry, AuditPage, AuditQuery, BindingPatch, ChainIntegrity, ControlPlaneError,
    EntityKind, Persona, PersonaPatch, SubVertical, SubVerticalPatch, TenantId, Updated, Vertical,
    VerticalPatch, WorkspaceBinding, WorkspaceId,
};
use cplane_state::{ActivationPlan, BindingSnapshot, EditPlan, Policy, PolicyPatch, StagePlan};

use crate::{AuditStore, ControlPlaneStore, StoreResult};

/// Map a driver error to `Internal`, logging the cause.
pub(crate) fn internal(err: sqlx::Error) -> ControlPlaneError {
    tracing::error!(error = %err, "database operation failed");
    ControlPlaneError::Internal(err.to_string())
}

/// Unique violations on insert become `Conflict`.
pub(crate) fn insert_error(
    err: sqlx::Error,
    entity: EntityKind,
    message: impl Into<String>,
) -> ControlPlaneError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return ControlPlaneError::conflict(entity, message);
        }
    }
    internal(err)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then apply embedded migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2.min(max_connections))
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        tracing::info!("Connected to PostgreSQL");

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ControlPlaneStore for PgStore {
    async fn insert_vertical(&self, vertical: &Vertical) -> StoreResult<()> {
        entities::insert_vertical(&self.pool, vertical).await
    }

    async fn get_vertical(&self, id: Uuid) -> StoreResult<Option<Vertical>> {
        entities::get_vertical(&self.pool, id).await
    }

    async fn update_vertical(
        &self,
        id: Uuid,
        patch: &VerticalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<Vertical>> {
        entities::update_vertical(&self.pool, id, patch, now).await
    }

    async fn insert_sub_vertical(&self, sub_vertical: &SubVertical) -> StoreResult<()> {
        entities::insert_sub_vertical(&self.pool, sub_vertical).await
    }

    async fn get_sub_vertical(&self, id: Uuid) -> StoreResult<Option<SubVertical>> {
        entities::get_sub_vertical(&self.pool, id).await
    }

    async fn update_sub_vertical(
        &self,
        id: Uuid,
        patch: &SubVerticalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<SubVertical>> {
        entities::update_sub_vertical(&self.pool, id, patch, now).await
    }

    async fn insert_persona(&self, persona: &Persona) -> StoreResult<()> {
        entities::insert_persona(&self.pool, persona).await
    }

    async fn get_persona(&self, id: Uuid) -> StoreResult<Option<Persona>> {
        entities::get_persona(&self.pool, id).await
    }

    async fn update_persona(
        &self,
        id: Uuid,
        patch: &PersonaPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<Persona>> {
        entities::update_persona(&self.pool, id, patch, now).await
    }

    async fn create_initial_policy(
        &self,
        persona_id: Uuid,
        initial: &PolicyPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Policy> {
        policies::create_initial(&self.pool, persona_id, initial, now).await
    }

    async fn apply_policy_edit(
        &self,
        policy_id: Uuid,
        patch: &PolicyPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<EditPlan> {
        policies::edit(&self.pool, policy_id, patch, now).await
    }

    async fn stage_policy(&self, policy_id: Uuid, now: DateTime<Utc>) -> StoreResult<StagePlan> {
        policies::stage(&self.pool, policy_id, now).await
    }

    async fn activate_policy(
        &self,
        policy_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<ActivationPlan> {
        policies::activate(&self.pool, policy_id, now).await
    }

    async fn rollback_policy(
        &self,
        persona_id: Uuid,
        target_version: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<ActivationPlan> {
        policies::rollback(&self.pool, persona_id, target_version, now).await
    }

    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<Policy>> {
        policies::get(&self.pool, id).await
    }

    async fn list_policies(&self, persona_id: Uuid) -> StoreResult<Vec<Policy>> {
        policies::list(&self.pool, persona_id).await
    }

    async fn insert_binding(&self, binding: &WorkspaceBinding) -> StoreResult<()> {
        entities::insert_binding(&self.pool, binding).await
    }

    async fn get_binding(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> StoreResult<Option<WorkspaceBinding>> {
        entities::get_binding(&self.pool, tenant_id, workspace_id).await
    }

    async fn update_binding(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
        patch: &BindingPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<WorkspaceBinding>> {
        entities::update_binding(&self.pool, tenant_id, workspace_id, patch, now).await
    }

    async fn load_resolution_snapshot(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> StoreResult<Option<BindingSnapshot>> {
        entities::load_resolution_snapshot(&self.pool, tenant_id, workspace_id).await
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_audit(&self, draft: AuditDraft) -> StoreResult<AuditEntry> {
        audit::append(&self.pool, draft).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<AuditPage> {
        audit::query(&self.pool, query).await
    }

    async fn verify_chain(&self, limit: u32) -> StoreResult<ChainIntegrity> {
        audit::verify_chain(&self.pool, limit).await
    }
}
