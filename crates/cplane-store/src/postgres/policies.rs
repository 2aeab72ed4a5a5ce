//! Policy chain persistence.
//!
//! Every lifecycle operation locks the owning persona row and then every
//! policy row of its chain (`FOR UPDATE`, version order) before planning.
//! Two concurrent activations for the same persona therefore serialize: the
//! second one plans against the chain the first one committed.
//!
//! Activation writes the deprecation before the activation so the partial
//! unique index on ACTIVE rows never sees two at once.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use cplane_core::{ControlPlaneError, EntityKind};
use cplane_state::{
    ActivationPlan, EditKind, EditPlan, Policy, PolicyChain, PolicyPatch, PolicyStatus, StagePlan,
};

use super::rows::{PolicyRow, POLICY_COLUMNS};
use super::{insert_error, internal};
use crate::StoreResult;

async fn lock_chain(conn: &mut PgConnection, persona_id: Uuid) -> StoreResult<PolicyChain> {
    let persona: Option<Uuid> = sqlx::query_scalar("SELECT id FROM persona WHERE id = $1 FOR UPDATE")
        .bind(persona_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(internal)?;
    if persona.is_none() {
        return Err(ControlPlaneError::not_found(EntityKind::Persona, persona_id));
    }

    let sql = format!(
        "SELECT {POLICY_COLUMNS} FROM policy WHERE persona_id = $1 ORDER BY policy_version FOR UPDATE"
    );
    let rows = sqlx::query_as::<_, PolicyRow>(&sql)
        .bind(persona_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(internal)?;
    let policies = rows
        .into_iter()
        .map(PolicyRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PolicyChain::new(persona_id, policies))
}

async fn persona_of(conn: &mut PgConnection, policy_id: Uuid) -> StoreResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>("SELECT persona_id FROM policy WHERE id = $1")
        .bind(policy_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(internal)?
        .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Policy, policy_id))
}

async fn insert(conn: &mut PgConnection, p: &Policy) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO policy (id, persona_id, policy_version, status, allowed_intents,
         forbidden_outputs, allowed_tools, evidence_scope, memory_scope, cost_budget,
         latency_budget, escalation_rules, disclaimer_rules, created_at, updated_at,
         staged_at, activated_at, deprecated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(p.id)
    .bind(p.persona_id)
    .bind(p.policy_version)
    .bind(p.status.as_str())
    .bind(&p.allowed_intents)
    .bind(&p.forbidden_outputs)
    .bind(&p.allowed_tools)
    .bind(&p.evidence_scope)
    .bind(&p.memory_scope)
    .bind(sqlx::types::Json(&p.cost_budget))
    .bind(sqlx::types::Json(&p.latency_budget))
    .bind(&p.escalation_rules)
    .bind(&p.disclaimer_rules)
    .bind(p.created_at)
    .bind(p.updated_at)
    .bind(p.staged_at)
    .bind(p.activated_at)
    .bind(p.deprecated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        insert_error(
            e,
            EntityKind::Policy,
            format!(
                "persona {} already has policy_version {}",
                p.persona_id, p.policy_version
            ),
        )
    })?;
    Ok(())
}

/// Conflict message for a unique violation raised while updating `p`. Only
/// the one-ACTIVE index can fire on an update, and only when `p` is ACTIVE.
fn update_conflict(p: &Policy) -> String {
    match p.status {
        PolicyStatus::Active => format!("persona {} already has an ACTIVE policy", p.persona_id),
        status => format!(
            "policy {} (version {}) could not be written as {status}: concurrent change to the chain",
            p.id, p.policy_version
        ),
    }
}

async fn update(conn: &mut PgConnection, p: &Policy) -> StoreResult<()> {
    sqlx::query(
        "UPDATE policy SET status = $2, allowed_intents = $3, forbidden_outputs = $4,
         allowed_tools = $5, evidence_scope = $6, memory_scope = $7, cost_budget = $8,
         latency_budget = $9, escalation_rules = $10, disclaimer_rules = $11, updated_at = $12,
         staged_at = $13, activated_at = $14, deprecated_at = $15
         WHERE id = $1",
    )
    .bind(p.id)
    .bind(p.status.as_str())
    .bind(&p.allowed_intents)
    .bind(&p.forbidden_outputs)
    .bind(&p.allowed_tools)
    .bind(&p.evidence_scope)
    .bind(&p.memory_scope)
    .bind(sqlx::types::Json(&p.cost_budget))
    .bind(sqlx::types::Json(&p.latency_budget))
    .bind(&p.escalation_rules)
    .bind(&p.disclaimer_rules)
    .bind(p.updated_at)
    .bind(p.staged_at)
    .bind(p.activated_at)
    .bind(p.deprecated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| insert_error(e, EntityKind::Policy, update_conflict(p)))?;
    Ok(())
}

async fn write_activation(conn: &mut PgConnection, plan: &ActivationPlan) -> StoreResult<()> {
    for policy in plan.writes() {
        update(conn, policy).await?;
    }
    Ok(())
}

pub(crate) async fn create_initial(
    pool: &PgPool,
    persona_id: Uuid,
    initial: &PolicyPatch,
    now: DateTime<Utc>,
) -> StoreResult<Policy> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let policy = lock_chain(&mut tx, persona_id)
        .await?
        .plan_initial(initial, now)?;
    insert(&mut tx, &policy).await?;
    tx.commit().await.map_err(internal)?;
    Ok(policy)
}

pub(crate) async fn edit(
    pool: &PgPool,
    policy_id: Uuid,
    patch: &PolicyPatch,
    now: DateTime<Utc>,
) -> StoreResult<EditPlan> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let persona_id = persona_of(&mut tx, policy_id).await?;
    let plan = lock_chain(&mut tx, persona_id)
        .await?
        .plan_edit(policy_id, patch, now)?;
    match plan.kind {
        EditKind::InPlace => update(&mut tx, &plan.result).await?,
        EditKind::NewVersion => insert(&mut tx, &plan.result).await?,
    }
    tx.commit().await.map_err(internal)?;
    Ok(plan)
}

pub(crate) async fn stage(pool: &PgPool, policy_id: Uuid, now: DateTime<Utc>) -> StoreResult<StagePlan> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let persona_id = persona_of(&mut tx, policy_id).await?;
    let plan = lock_chain(&mut tx, persona_id)
        .await?
        .plan_stage(policy_id, now)?;
    if !plan.noop {
        update(&mut tx, &plan.after).await?;
    }
    tx.commit().await.map_err(internal)?;
    Ok(plan)
}

pub(crate) async fn activate(
    pool: &PgPool,
    policy_id: Uuid,
    now: DateTime<Utc>,
) -> StoreResult<ActivationPlan> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let persona_id = persona_of(&mut tx, policy_id).await?;
    let plan = lock_chain(&mut tx, persona_id)
        .await?
        .plan_activation(policy_id, now)?;
    write_activation(&mut tx, &plan).await?;
    tx.commit().await.map_err(internal)?;
    Ok(plan)
}

pub(crate) async fn rollback(
    pool: &PgPool,
    persona_id: Uuid,
    target_version: i32,
    now: DateTime<Utc>,
) -> StoreResult<ActivationPlan> {
    let mut tx = pool.begin().await.map_err(internal)?;
    let plan = lock_chain(&mut tx, persona_id)
        .await?
        .plan_rollback(target_version, now)?;
    write_activation(&mut tx, &plan).await?;
    tx.commit().await.map_err(internal)?;
    Ok(plan)
}

pub(crate) async fn get(pool: &PgPool, id: Uuid) -> StoreResult<Option<Policy>> {
    let sql = format!("SELECT {POLICY_COLUMNS} FROM policy WHERE id = $1");
    sqlx::query_as::<_, PolicyRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal)?
        .map(PolicyRow::into_record)
        .transpose()
}

pub(crate) async fn list(pool: &PgPool, persona_id: Uuid) -> StoreResult<Vec<Policy>> {
    let persona: Option<Uuid> = sqlx::query_scalar("SELECT id FROM persona WHERE id = $1")
        .bind(persona_id)
        .fetch_optional(pool)
        .await
        .map_err(internal)?;
    if persona.is_none() {
        return Err(ControlPlaneError::not_found(EntityKind::Persona, persona_id));
    }
    let sql = format!("SELECT {POLICY_COLUMNS} FROM policy WHERE persona_id = $1 ORDER BY policy_version");
    sqlx::query_as::<_, PolicyRow>(&sql)
        .bind(persona_id)
        .fetch_all(pool)
        .await
        .map_err(internal)?
        .into_iter()
        .map(PolicyRow::into_record)
        .collect()
}
