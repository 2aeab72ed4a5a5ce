//! Vertical, sub-vertical, persona and workspace binding persistence.
//!
//! Updates run in their own transaction: the row is locked with
//! `SELECT … FOR UPDATE`, patched in memory, written back, and the blast
//! radius of a deactivation is counted before commit.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use cplane_core::model::is_deactivation;
use cplane_core::{
    BindingPatch, BlastRadius, ControlPlaneError, EntityKind, Persona, PersonaPatch, SubVertical,
    SubVerticalPatch, TenantId, Updated, Vertical, VerticalPatch, WorkspaceBinding, WorkspaceId,
};
use cplane_state::BindingSnapshot;

use super::rows::{
    from_json, BindingRow, PersonaRow, PolicyRow, SubVerticalRow, VerticalRow, BINDING_COLUMNS,
    PERSONA_COLUMNS, SUB_VERTICAL_COLUMNS, VERTICAL_COLUMNS,
};
use super::{insert_error, internal};
use crate::StoreResult;

async fn blast_radius(
    conn: &mut PgConnection,
    id: Uuid,
    was_active: bool,
    patch_active: Option<bool>,
) -> StoreResult<Option<BlastRadius>> {
    if !is_deactivation(was_active, patch_active) {
        return Ok(None);
    }
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM workspace_binding
         WHERE is_active AND (vertical_id = $1 OR sub_vertical_id = $1 OR persona_id = $1)",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await
    .map_err(internal)?;
    Ok(Some(BlastRadius {
        active_bindings: count.max(0) as u64,
    }))
}

async fn exists(conn: &mut PgConnection, table: &str, id: Uuid) -> StoreResult<bool> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
    sqlx::query_scalar::<_, bool>(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(internal)
}

// ── Verticals ──

pub(crate) async fn insert_vertical(pool: &PgPool, v: &Vertical) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO vertical (id, key, name, entity_type, region_scope, is_active, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(v.id)
    .bind(&v.key)
    .bind(&v.name)
    .bind(v.entity_type.as_str())
    .bind(&v.region_scope)
    .bind(v.is_active)
    .bind(v.created_at)
    .bind(v.updated_at)
    .execute(pool)
    .await
    .map_err(|e| {
        insert_error(
            e,
            EntityKind::Vertical,
            format!("vertical key {:?} already exists", v.key),
        )
    })?;
    Ok(())
}

pub(crate) async fn get_vertical(pool: &PgPool, id: Uuid) -> StoreResult<Option<Vertical>> {
    let sql = format!("SELECT {VERTICAL_COLUMNS} FROM vertical WHERE id = $1");
    sqlx::query_as::<_, VerticalRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal)?
        .map(VerticalRow::into_record)
        .transpose()
}

pub(crate) async fn update_vertical(
    pool: &PgPool,
    id: Uuid,
    patch: &VerticalPatch,
    now: DateTime<Utc>,
) -> StoreResult<Updated<Vertical>> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let sql = format!("SELECT {VERTICAL_COLUMNS} FROM vertical WHERE id = $1 FOR UPDATE");
    let before = sqlx::query_as::<_, VerticalRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?
        .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Vertical, id))?
        .into_record()?;

    let mut after = before.clone();
    after.apply(patch, now);
    sqlx::query(
        "UPDATE vertical SET name = $2, region_scope = $3, is_active = $4, updated_at = $5
         WHERE id = $1",
    )
    .bind(id)
    .bind(&after.name)
    .bind(&after.region_scope)
    .bind(after.is_active)
    .bind(after.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(internal)?;

    let blast_radius = blast_radius(&mut tx, id, before.is_active, patch.is_active).await?;
    tx.commit().await.map_err(internal)?;
    Ok(Updated {
        before,
        after,
        blast_radius,
    })
}

// ── Sub-verticals ──

pub(crate) async fn insert_sub_vertical(pool: &PgPool, sv: &SubVertical) -> StoreResult<()> {
    let mut tx = pool.begin().await.map_err(internal)?;
    if !exists(&mut tx, "vertical", sv.vertical_id).await? {
        return Err(ControlPlaneError::not_found(EntityKind::Vertical, sv.vertical_id));
    }
    let related: Vec<String> = sv.related_entity_types.iter().map(|t| t.to_string()).collect();
    sqlx::query(
        "INSERT INTO sub_vertical (id, vertical_id, key, name, default_agent, primary_entity_type,
         related_entity_types, is_active, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(sv.id)
    .bind(sv.vertical_id)
    .bind(&sv.key)
    .bind(&sv.name)
    .bind(&sv.default_agent)
    .bind(sv.primary_entity_type.as_str())
    .bind(&related)
    .bind(sv.is_active)
    .bind(sv.created_at)
    .bind(sv.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        insert_error(
            e,
            EntityKind::SubVertical,
            format!("sub-vertical key {:?} already exists in this vertical", sv.key),
        )
    })?;
    tx.commit().await.map_err(internal)
}

pub(crate) async fn get_sub_vertical(pool: &PgPool, id: Uuid) -> StoreResult<Option<SubVertical>> {
    let sql = format!("SELECT {SUB_VERTICAL_COLUMNS} FROM sub_vertical WHERE id = $1");
    sqlx::query_as::<_, SubVerticalRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal)?
        .map(SubVerticalRow::into_record)
        .transpose()
}

pub(crate) async fn update_sub_vertical(
    pool: &PgPool,
    id: Uuid,
    patch: &SubVerticalPatch,
    now: DateTime<Utc>,
) -> StoreResult<Updated<SubVertical>> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let sql = format!("SELECT {SUB_VERTICAL_COLUMNS} FROM sub_vertical WHERE id = $1 FOR UPDATE");
    let before = sqlx::query_as::<_, SubVerticalRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?
        .ok_or_else(|| ControlPlaneError::not_found(EntityKind::SubVertical, id))?
        .into_record()?;

    let mut after = before.clone();
    after.apply(patch, now);
    let related: Vec<String> = after
        .related_entity_types
        .iter()
        .map(|t| t.to_string())
        .collect();
    sqlx::query(
        "UPDATE sub_vertical SET name = $2, default_agent = $3, related_entity_types = $4,
         is_active = $5, updated_at = $6 WHERE id = $1",
    )
    .bind(id)
    .bind(&after.name)
    .bind(&after.default_agent)
    .bind(&related)
    .bind(after.is_active)
    .bind(after.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(internal)?;

    let blast_radius = blast_radius(&mut tx, id, before.is_active, patch.is_active).await?;
    tx.commit().await.map_err(internal)?;
    Ok(Updated {
        before,
        after,
        blast_radius,
    })
}

// ── Personas ──

pub(crate) async fn insert_persona(pool: &PgPool, p: &Persona) -> StoreResult<()> {
    let mut tx = pool.begin().await.map_err(internal)?;
    if !exists(&mut tx, "sub_vertical", p.sub_vertical_id).await? {
        return Err(ControlPlaneError::not_found(
            EntityKind::SubVertical,
            p.sub_vertical_id,
        ));
    }
    sqlx::query(
        "INSERT INTO persona (id, sub_vertical_id, key, name, mission, decision_lens, scope,
         region_code, is_active, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(p.id)
    .bind(p.sub_vertical_id)
    .bind(&p.key)
    .bind(&p.name)
    .bind(&p.mission)
    .bind(&p.decision_lens)
    .bind(p.scope.as_str())
    .bind(&p.region_code)
    .bind(p.is_active)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        insert_error(
            e,
            EntityKind::Persona,
            format!("persona key {:?} already exists in this sub-vertical", p.key),
        )
    })?;
    tx.commit().await.map_err(internal)
}

pub(crate) async fn get_persona(pool: &PgPool, id: Uuid) -> StoreResult<Option<Persona>> {
    let sql = format!("SELECT {PERSONA_COLUMNS} FROM persona WHERE id = $1");
    sqlx::query_as::<_, PersonaRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal)?
        .map(PersonaRow::into_record)
        .transpose()
}

pub(crate) async fn update_persona(
    pool: &PgPool,
    id: Uuid,
    patch: &PersonaPatch,
    now: DateTime<Utc>,
) -> StoreResult<Updated<Persona>> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let sql = format!("SELECT {PERSONA_COLUMNS} FROM persona WHERE id = $1 FOR UPDATE");
    let before = sqlx::query_as::<_, PersonaRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?
        .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Persona, id))?
        .into_record()?;

    let mut after = before.clone();
    after.apply(patch, now);
    after.validate_region()?;
    sqlx::query(
        "UPDATE persona SET name = $2, mission = $3, decision_lens = $4, scope = $5,
         region_code = $6, is_active = $7, updated_at = $8 WHERE id = $1",
    )
    .bind(id)
    .bind(&after.name)
    .bind(&after.mission)
    .bind(&after.decision_lens)
    .bind(after.scope.as_str())
    .bind(&after.region_code)
    .bind(after.is_active)
    .bind(after.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(internal)?;

    let blast_radius = blast_radius(&mut tx, id, before.is_active, patch.is_active).await?;
    tx.commit().await.map_err(internal)?;
    Ok(Updated {
        before,
        after,
        blast_radius,
    })
}

// ── Workspace bindings ──

pub(crate) async fn insert_binding(pool: &PgPool, b: &WorkspaceBinding) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO workspace_binding (id, tenant_id, workspace_id, vertical_id, sub_vertical_id,
         persona_id, is_active, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(b.id)
    .bind(b.tenant_id.as_uuid())
    .bind(b.workspace_id.as_uuid())
    .bind(b.vertical_id)
    .bind(b.sub_vertical_id)
    .bind(b.persona_id)
    .bind(b.is_active)
    .bind(b.created_at)
    .bind(b.updated_at)
    .execute(pool)
    .await
    .map_err(|e| {
        insert_error(
            e,
            EntityKind::WorkspaceBinding,
            format!("workspace {} is already bound", b.workspace_id),
        )
    })?;
    Ok(())
}

pub(crate) async fn get_binding(
    pool: &PgPool,
    tenant_id: TenantId,
    workspace_id: WorkspaceId,
) -> StoreResult<Option<WorkspaceBinding>> {
    let sql = format!(
        "SELECT {BINDING_COLUMNS} FROM workspace_binding WHERE tenant_id = $1 AND workspace_id = $2"
    );
    let row = sqlx::query_as::<_, BindingRow>(&sql)
        .bind(tenant_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .fetch_optional(pool)
        .await
        .map_err(internal)?;
    Ok(row.map(BindingRow::into_record))
}

pub(crate) async fn update_binding(
    pool: &PgPool,
    tenant_id: TenantId,
    workspace_id: WorkspaceId,
    patch: &BindingPatch,
    now: DateTime<Utc>,
) -> StoreResult<Updated<WorkspaceBinding>> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let sql = format!(
        "SELECT {BINDING_COLUMNS} FROM workspace_binding
         WHERE tenant_id = $1 AND workspace_id = $2 FOR UPDATE"
    );
    let before = sqlx::query_as::<_, BindingRow>(&sql)
        .bind(tenant_id.as_uuid())
        .bind(workspace_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?
        .ok_or_else(|| ControlPlaneError::not_found(EntityKind::WorkspaceBinding, workspace_id))?
        .into_record();

    let mut after = before.clone();
    after.apply(patch, now);
    sqlx::query(
        "UPDATE workspace_binding SET vertical_id = $2, sub_vertical_id = $3, persona_id = $4,
         is_active = $5, updated_at = $6 WHERE id = $1",
    )
    .bind(after.id)
    .bind(after.vertical_id)
    .bind(after.sub_vertical_id)
    .bind(after.persona_id)
    .bind(after.is_active)
    .bind(after.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(internal)?;
    tx.commit().await.map_err(internal)?;
    Ok(Updated {
        before,
        after,
        blast_radius: None,
    })
}

// ── Resolution ──

type SnapshotRow = (
    serde_json::Value,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
);

/// The whole chain in one statement, so the read sees a single snapshot.
pub(crate) async fn load_resolution_snapshot(
    pool: &PgPool,
    tenant_id: TenantId,
    workspace_id: WorkspaceId,
) -> StoreResult<Option<BindingSnapshot>> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        "SELECT to_jsonb(b), to_jsonb(v), to_jsonb(sv), to_jsonb(p), to_jsonb(pol)
         FROM workspace_binding b
         LEFT JOIN vertical v ON v.id = b.vertical_id
         LEFT JOIN sub_vertical sv ON sv.id = b.sub_vertical_id
         LEFT JOIN persona p ON p.id = b.persona_id
         LEFT JOIN policy pol ON pol.persona_id = b.persona_id AND pol.status = 'ACTIVE'
         WHERE b.tenant_id = $1 AND b.workspace_id = $2",
    )
    .bind(tenant_id.as_uuid())
    .bind(workspace_id.as_uuid())
    .fetch_optional(pool)
    .await
    .map_err(internal)?;

    let Some((binding, vertical, sub_vertical, persona, policy)) = row else {
        return Ok(None);
    };
    Ok(Some(BindingSnapshot {
        binding: from_json::<BindingRow>("workspace_binding", binding)?.into_record(),
        vertical: vertical
            .map(|v| from_json::<VerticalRow>("vertical", v)?.into_record())
            .transpose()?,
        sub_vertical: sub_vertical
            .map(|v| from_json::<SubVerticalRow>("sub_vertical", v)?.into_record())
            .transpose()?,
        persona: persona
            .map(|v| from_json::<PersonaRow>("persona", v)?.into_record())
            .transpose()?,
        active_policy: policy
            .map(|v| from_json::<PolicyRow>("policy", v)?.into_record())
            .transpose()?,
    }))
}
