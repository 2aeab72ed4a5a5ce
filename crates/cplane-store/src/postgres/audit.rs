//! Audit log persistence: immutable hash chain.
//!
//! Appends take a transaction-scoped advisory lock so two writers never
//! link to the same chain head. Ordering uses the `seq` column; `created_at`
//! can tie.

use std::collections::BTreeSet;

use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use cplane_core::audit::{verify_links, GENESIS_HASH};
use cplane_core::{AuditDraft, AuditEntry, AuditPage, AuditQuery, ChainIntegrity};

use super::internal;
use super::rows::{AuditRow, AUDIT_COLUMNS};
use crate::StoreResult;

/// Advisory lock key serializing chain appends.
const AUDIT_CHAIN_LOCK: i64 = 0x6370_6c61_6e65_0001;

pub(crate) async fn append(pool: &PgPool, draft: AuditDraft) -> StoreResult<AuditEntry> {
    let mut tx = pool.begin().await.map_err(internal)?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(AUDIT_CHAIN_LOCK)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;

    let previous: Option<String> =
        sqlx::query_scalar("SELECT entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?;
    let entry = draft.seal(Uuid::new_v4(), previous.as_deref().unwrap_or(GENESIS_HASH));

    sqlx::query(
        "INSERT INTO audit_log (id, actor, tenant_id, action, target_type, target_id, request,
         result, success, error_code, error_message, previous_hash, entry_hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(entry.id)
    .bind(&entry.actor)
    .bind(entry.tenant_id.map(|t| *t.as_uuid()))
    .bind(entry.action.as_str())
    .bind(entry.target_type.as_str())
    .bind(&entry.target_id)
    .bind(&entry.request)
    .bind(&entry.result)
    .bind(entry.success)
    .bind(&entry.error_code)
    .bind(&entry.error_message)
    .bind(&entry.previous_hash)
    .bind(&entry.entry_hash)
    .bind(entry.created_at)
    .execute(&mut *tx)
    .await
    .map_err(internal)?;

    tx.commit().await.map_err(internal)?;
    Ok(entry)
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &AuditQuery) {
    qb.push(" WHERE TRUE");
    if let Some(action) = q.action {
        qb.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(target_type) = q.target_type {
        qb.push(" AND target_type = ").push_bind(target_type.as_str());
    }
    if let Some(actor) = &q.actor {
        qb.push(" AND actor = ").push_bind(actor.clone());
    }
    if let Some(target_id) = &q.target_id {
        qb.push(" AND target_id = ").push_bind(target_id.clone());
    }
    if let Some(tenant_id) = q.tenant_id {
        qb.push(" AND tenant_id = ").push_bind(*tenant_id.as_uuid());
    }
    if let Some(from) = q.from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = q.to {
        qb.push(" AND created_at < ").push_bind(to);
    }
}

pub(crate) async fn query(pool: &PgPool, q: &AuditQuery) -> StoreResult<AuditPage> {
    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_log");
    push_filters(&mut count, q);
    let total: i64 = count
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await
        .map_err(internal)?;

    let mut page = QueryBuilder::<Postgres>::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_log"));
    push_filters(&mut page, q);
    page.push(" ORDER BY seq DESC LIMIT ")
        .push_bind(i64::from(q.limit()))
        .push(" OFFSET ")
        .push_bind(i64::from(q.offset()));
    let entries = page
        .build_query_as::<AuditRow>()
        .fetch_all(pool)
        .await
        .map_err(internal)?
        .into_iter()
        .map(AuditRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;

    let tenant = q.tenant_id.map(|t| *t.as_uuid());
    let facets: Vec<(String, String)> = sqlx::query_as(
        "SELECT DISTINCT action, target_type FROM audit_log
         WHERE ($1::uuid IS NULL OR tenant_id = $1)",
    )
    .bind(tenant)
    .fetch_all(pool)
    .await
    .map_err(internal)?;

    let mut actions = BTreeSet::new();
    let mut target_types = BTreeSet::new();
    for (action, target_type) in facets {
        actions.insert(action);
        target_types.insert(target_type);
    }

    Ok(AuditPage {
        entries,
        total: total.max(0) as u64,
        distinct_actions: actions.iter().filter_map(|a| a.parse().ok()).collect(),
        distinct_target_types: target_types.iter().filter_map(|t| t.parse().ok()).collect(),
    })
}

/// Verify the newest `limit` entries. One extra row is read to anchor the
/// oldest of them; without it the window starts at the genesis entry.
pub(crate) async fn verify_chain(pool: &PgPool, limit: u32) -> StoreResult<ChainIntegrity> {
    let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY seq DESC LIMIT $1");
    let mut entries = sqlx::query_as::<_, AuditRow>(&sql)
        .bind(i64::from(limit) + 1)
        .fetch_all(pool)
        .await
        .map_err(internal)?
        .into_iter()
        .map(AuditRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    entries.reverse();

    if entries.len() > limit as usize {
        let anchor = entries.remove(0);
        Ok(verify_links(&anchor.entry_hash, &entries))
    } else {
        Ok(verify_links(GENESIS_HASH, &entries))
    }
}
