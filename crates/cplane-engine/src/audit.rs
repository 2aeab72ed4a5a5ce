//! # Audit Log Service
//!
//! Every mutating operation writes exactly one audit entry describing its
//! outcome. Appends are best-effort: a failed append is logged and counted
//! but never fails or rolls back the operation that triggered it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use cplane_core::{
    Actor, AuditAction, AuditDraft, AuditEntry, AuditPage, AuditQuery, ChainIntegrity,
    ControlPlaneError, EntityKind,
};
use cplane_store::AuditStore;

/// Entries walked by [`AuditLog::verify`] when no limit is given.
pub const DEFAULT_VERIFY_LIMIT: u32 = 10_000;
/// Hard cap on a single chain walk.
pub const MAX_VERIFY_LIMIT: u32 = 100_000;

/// JSON snapshot of a request or result. Unserializable values become `null`.
pub(crate) fn snapshot<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append `draft`. Returns the sealed entry, or `None` if the append
    /// failed.
    pub async fn record(&self, draft: AuditDraft) -> Option<AuditEntry> {
        let action = draft.action;
        let target_id = draft.target_id.clone();
        match self.store.append_audit(draft).await {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::error!(
                    action = %action,
                    target_id = target_id.as_deref().unwrap_or("-"),
                    error = %err,
                    "audit append failed"
                );
                metrics::counter!("cplane_audit_append_failures_total").increment(1);
                None
            }
        }
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<AuditPage, ControlPlaneError> {
        self.store.query_audit(query).await
    }

    /// Walk the newest `limit` entries and report broken links.
    pub async fn verify(&self, limit: Option<u32>) -> Result<ChainIntegrity, ControlPlaneError> {
        let limit = limit.unwrap_or(DEFAULT_VERIFY_LIMIT).clamp(1, MAX_VERIFY_LIMIT);
        self.store.verify_chain(limit).await
    }

    /// Open an audit record for one operation. The record is written by
    /// [`Audited::finish`].
    pub(crate) fn begin<'a>(
        &'a self,
        actor: &'a Actor,
        action: AuditAction,
        target_type: EntityKind,
        target_id: Option<String>,
        request: Value,
    ) -> Audited<'a> {
        Audited {
            log: self,
            actor,
            action,
            target_type,
            target_id,
            request,
        }
    }
}

pub(crate) struct Audited<'a> {
    log: &'a AuditLog,
    actor: &'a Actor,
    action: AuditAction,
    target_type: EntityKind,
    target_id: Option<String>,
    request: Value,
}

impl Audited<'_> {
    /// Record the outcome and hand it back unchanged.
    ///
    /// `describe` yields the target id (overriding the one given to
    /// `begin` when set) and the result snapshot of a success.
    pub(crate) async fn finish<T, F>(
        self,
        outcome: Result<T, ControlPlaneError>,
        describe: F,
    ) -> Result<T, ControlPlaneError>
    where
        F: FnOnce(&T) -> (Option<String>, Value),
    {
        let draft = match &outcome {
            Ok(value) => {
                let (target_id, result) = describe(value);
                AuditDraft::success(
                    self.actor,
                    self.action,
                    self.target_type,
                    target_id.or(self.target_id),
                    self.request,
                    result,
                )
            }
            Err(err) => AuditDraft::failure(
                self.actor,
                self.action,
                self.target_type,
                self.target_id,
                self.request,
                err,
            ),
        };
        self.log.record(draft).await;
        outcome
    }
}
