//! In-memory adapter.
//!
//! All tables sit behind one `parking_lot::RwLock`, so each trait method is
//! a single critical section. Guards are never held across an `.await`. The
//! audit log has its own lock so appends never contend with business writes.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use cplane_core::audit::{verify_links, GENESIS_HASH};
use cplane_core::model::is_deactivation;
use cplane_core::{
    AuditDraft, AuditEntry, AuditPage, AuditQuery, BindingPatch, BlastRadius, ChainIntegrity,
    ControlPlaneError, EntityKind, Persona, PersonaPatch, SubVertical, SubVerticalPatch, TenantId,
    Updated, Vertical, VerticalPatch, WorkspaceBinding, WorkspaceId,
};
use cplane_state::{
    ActivationPlan, BindingSnapshot, EditPlan, Policy, PolicyChain, PolicyPatch, PolicyStatus,
    StagePlan,
};

use crate::{AuditStore, ControlPlaneStore, StoreResult};

#[derive(Default)]
struct Tables {
    verticals: HashMap<Uuid, Vertical>,
    sub_verticals: HashMap<Uuid, SubVertical>,
    personas: HashMap<Uuid, Persona>,
    policies: HashMap<Uuid, Policy>,
    bindings: HashMap<(TenantId, WorkspaceId), WorkspaceBinding>,
}

impl Tables {
    fn chain(&self, persona_id: Uuid) -> StoreResult<PolicyChain> {
        if !self.personas.contains_key(&persona_id) {
            return Err(ControlPlaneError::not_found(EntityKind::Persona, persona_id));
        }
        let policies = self
            .policies
            .values()
            .filter(|p| p.persona_id == persona_id)
            .cloned()
            .collect();
        Ok(PolicyChain::new(persona_id, policies))
    }

    fn chain_of_policy(&self, policy_id: Uuid) -> StoreResult<PolicyChain> {
        let persona_id = self
            .policies
            .get(&policy_id)
            .map(|p| p.persona_id)
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Policy, policy_id))?;
        self.chain(persona_id)
    }

    fn write_policy(&mut self, policy: &Policy) {
        self.policies.insert(policy.id, policy.clone());
    }

    fn active_bindings(&self, entity_id: Uuid) -> u64 {
        self.bindings
            .values()
            .filter(|b| b.is_active && b.references(entity_id))
            .count() as u64
    }

    fn blast_radius(&self, id: Uuid, was_active: bool, patch_active: Option<bool>) -> Option<BlastRadius> {
        is_deactivation(was_active, patch_active).then(|| BlastRadius {
            active_bindings: self.active_bindings(id),
        })
    }
}

/// Process-local store for development mode and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of audit entries recorded so far.
    pub fn audit_len(&self) -> usize {
        self.audit.lock().len()
    }

    /// Overwrite a stored audit entry. Test hook for tamper detection.
    #[doc(hidden)]
    pub fn tamper_audit(&self, index: usize, f: impl FnOnce(&mut AuditEntry)) {
        if let Some(entry) = self.audit.lock().get_mut(index) {
            f(entry);
        }
    }
}

#[async_trait]
impl ControlPlaneStore for MemoryStore {
    // ── Verticals ──

    async fn insert_vertical(&self, vertical: &Vertical) -> StoreResult<()> {
        let mut t = self.tables.write();
        if t.verticals.values().any(|v| v.key == vertical.key) {
            return Err(ControlPlaneError::conflict(
                EntityKind::Vertical,
                format!("vertical key {:?} already exists", vertical.key),
            ));
        }
        t.verticals.insert(vertical.id, vertical.clone());
        Ok(())
    }

    async fn get_vertical(&self, id: Uuid) -> StoreResult<Option<Vertical>> {
        Ok(self.tables.read().verticals.get(&id).cloned())
    }

    async fn update_vertical(
        &self,
        id: Uuid,
        patch: &VerticalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<Vertical>> {
        let mut t = self.tables.write();
        let before = t
            .verticals
            .get(&id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Vertical, id))?;
        let blast_radius = t.blast_radius(id, before.is_active, patch.is_active);
        let mut after = before.clone();
        after.apply(patch, now);
        t.verticals.insert(id, after.clone());
        Ok(Updated {
            before,
            after,
            blast_radius,
        })
    }

    // ── Sub-verticals ──

    async fn insert_sub_vertical(&self, sub_vertical: &SubVertical) -> StoreResult<()> {
        let mut t = self.tables.write();
        if !t.verticals.contains_key(&sub_vertical.vertical_id) {
            return Err(ControlPlaneError::not_found(
                EntityKind::Vertical,
                sub_vertical.vertical_id,
            ));
        }
        if t
            .sub_verticals
            .values()
            .any(|sv| sv.vertical_id == sub_vertical.vertical_id && sv.key == sub_vertical.key)
        {
            return Err(ControlPlaneError::conflict(
                EntityKind::SubVertical,
                format!(
                    "sub-vertical key {:?} already exists in this vertical",
                    sub_vertical.key
                ),
            ));
        }
        t.sub_verticals.insert(sub_vertical.id, sub_vertical.clone());
        Ok(())
    }

    async fn get_sub_vertical(&self, id: Uuid) -> StoreResult<Option<SubVertical>> {
        Ok(self.tables.read().sub_verticals.get(&id).cloned())
    }

    async fn update_sub_vertical(
        &self,
        id: Uuid,
        patch: &SubVerticalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<SubVertical>> {
        let mut t = self.tables.write();
        let before = t
            .sub_verticals
            .get(&id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::SubVertical, id))?;
        let blast_radius = t.blast_radius(id, before.is_active, patch.is_active);
        let mut after = before.clone();
        after.apply(patch, now);
        t.sub_verticals.insert(id, after.clone());
        Ok(Updated {
            before,
            after,
            blast_radius,
        })
    }

    // ── Personas ──

    async fn insert_persona(&self, persona: &Persona) -> StoreResult<()> {
        let mut t = self.tables.write();
        if !t.sub_verticals.contains_key(&persona.sub_vertical_id) {
            return Err(ControlPlaneError::not_found(
                EntityKind::SubVertical,
                persona.sub_vertical_id,
            ));
        }
        if t
            .personas
            .values()
            .any(|p| p.sub_vertical_id == persona.sub_vertical_id && p.key == persona.key)
        {
            return Err(ControlPlaneError::conflict(
                EntityKind::Persona,
                format!(
                    "persona key {:?} already exists in this sub-vertical",
                    persona.key
                ),
            ));
        }
        t.personas.insert(persona.id, persona.clone());
        Ok(())
    }

    async fn get_persona(&self, id: Uuid) -> StoreResult<Option<Persona>> {
        Ok(self.tables.read().personas.get(&id).cloned())
    }

    async fn update_persona(
        &self,
        id: Uuid,
        patch: &PersonaPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<Persona>> {
        let mut t = self.tables.write();
        let before = t
            .personas
            .get(&id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::Persona, id))?;
        let mut after = before.clone();
        after.apply(patch, now);
        after.validate_region()?;
        let blast_radius = t.blast_radius(id, before.is_active, patch.is_active);
        t.personas.insert(id, after.clone());
        Ok(Updated {
            before,
            after,
            blast_radius,
        })
    }

    // ── Policies ──

    async fn create_initial_policy(
        &self,
        persona_id: Uuid,
        initial: &PolicyPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Policy> {
        let mut t = self.tables.write();
        let policy = t.chain(persona_id)?.plan_initial(initial, now)?;
        t.write_policy(&policy);
        Ok(policy)
    }

    async fn apply_policy_edit(
        &self,
        policy_id: Uuid,
        patch: &PolicyPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<EditPlan> {
        let mut t = self.tables.write();
        let plan = t.chain_of_policy(policy_id)?.plan_edit(policy_id, patch, now)?;
        t.write_policy(&plan.result);
        Ok(plan)
    }

    async fn stage_policy(&self, policy_id: Uuid, now: DateTime<Utc>) -> StoreResult<StagePlan> {
        let mut t = self.tables.write();
        let plan = t.chain_of_policy(policy_id)?.plan_stage(policy_id, now)?;
        if !plan.noop {
            t.write_policy(&plan.after);
        }
        Ok(plan)
    }

    async fn activate_policy(
        &self,
        policy_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<ActivationPlan> {
        let mut t = self.tables.write();
        let plan = t
            .chain_of_policy(policy_id)?
            .plan_activation(policy_id, now)?;
        for policy in plan.writes() {
            t.write_policy(policy);
        }
        Ok(plan)
    }

    async fn rollback_policy(
        &self,
        persona_id: Uuid,
        target_version: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<ActivationPlan> {
        let mut t = self.tables.write();
        let plan = t.chain(persona_id)?.plan_rollback(target_version, now)?;
        for policy in plan.writes() {
            t.write_policy(policy);
        }
        Ok(plan)
    }

    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<Policy>> {
        Ok(self.tables.read().policies.get(&id).cloned())
    }

    async fn list_policies(&self, persona_id: Uuid) -> StoreResult<Vec<Policy>> {
        Ok(self.tables.read().chain(persona_id)?.into_policies())
    }

    // ── Workspace bindings ──

    async fn insert_binding(&self, binding: &WorkspaceBinding) -> StoreResult<()> {
        let mut t = self.tables.write();
        let key = (binding.tenant_id, binding.workspace_id);
        if t.bindings.contains_key(&key) {
            return Err(ControlPlaneError::conflict(
                EntityKind::WorkspaceBinding,
                format!("workspace {} is already bound", binding.workspace_id),
            ));
        }
        t.bindings.insert(key, binding.clone());
        Ok(())
    }

    async fn get_binding(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> StoreResult<Option<WorkspaceBinding>> {
        Ok(self
            .tables
            .read()
            .bindings
            .get(&(tenant_id, workspace_id))
            .cloned())
    }

    async fn update_binding(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
        patch: &BindingPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Updated<WorkspaceBinding>> {
        let mut t = self.tables.write();
        let slot = t
            .bindings
            .get_mut(&(tenant_id, workspace_id))
            .ok_or_else(|| ControlPlaneError::not_found(EntityKind::WorkspaceBinding, workspace_id))?;
        let before = slot.clone();
        slot.apply(patch, now);
        Ok(Updated {
            before,
            after: slot.clone(),
            blast_radius: None,
        })
    }

    // ── Resolution ──

    async fn load_resolution_snapshot(
        &self,
        tenant_id: TenantId,
        workspace_id: WorkspaceId,
    ) -> StoreResult<Option<BindingSnapshot>> {
        let t = self.tables.read();
        let Some(binding) = t.bindings.get(&(tenant_id, workspace_id)) else {
            return Ok(None);
        };
        let active_policy = t
            .policies
            .values()
            .find(|p| p.persona_id == binding.persona_id && p.status == PolicyStatus::Active)
            .cloned();
        Ok(Some(BindingSnapshot {
            binding: binding.clone(),
            vertical: t.verticals.get(&binding.vertical_id).cloned(),
            sub_vertical: t.sub_verticals.get(&binding.sub_vertical_id).cloned(),
            persona: t.personas.get(&binding.persona_id).cloned(),
            active_policy,
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, draft: AuditDraft) -> StoreResult<AuditEntry> {
        let mut log = self.audit.lock();
        let previous = log
            .last()
            .map_or(GENESIS_HASH, |e| e.entry_hash.as_str())
            .to_string();
        let entry = draft.seal(Uuid::new_v4(), &previous);
        log.push(entry.clone());
        Ok(entry)
    }

    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<AuditPage> {
        let log = self.audit.lock();
        let matching: Vec<&AuditEntry> = log.iter().rev().filter(|e| query.matches(e)).collect();

        let mut actions = BTreeSet::new();
        let mut target_types = BTreeSet::new();
        for entry in log
            .iter()
            .filter(|e| query.tenant_id.map_or(true, |t| e.tenant_id == Some(t)))
        {
            actions.insert(entry.action.as_str());
            target_types.insert(entry.target_type.as_str());
        }

        Ok(AuditPage {
            total: matching.len() as u64,
            entries: matching
                .into_iter()
                .skip(query.offset() as usize)
                .take(query.limit() as usize)
                .cloned()
                .collect(),
            distinct_actions: actions.into_iter().filter_map(|a| a.parse().ok()).collect(),
            distinct_target_types: target_types
                .into_iter()
                .filter_map(|t| t.parse().ok())
                .collect(),
        })
    }

    async fn verify_chain(&self, limit: u32) -> StoreResult<ChainIntegrity> {
        let log = self.audit.lock();
        let start = log.len().saturating_sub(limit as usize);
        let anchor = match start {
            0 => GENESIS_HASH,
            n => log[n - 1].entry_hash.as_str(),
        };
        Ok(verify_links(anchor, &log[start..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cplane_core::{Actor, AuditAction, EntityType, PersonaScope};

    fn vertical(key: &str) -> Vertical {
        let now = Utc::now();
        Vertical {
            id: Uuid::new_v4(),
            key: key.into(),
            name: key.into(),
            entity_type: EntityType::Company,
            region_scope: vec![],
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_vertical_key_conflicts() {
        let store = MemoryStore::new();
        store.insert_vertical(&vertical("banking")).await.unwrap();
        let err = store.insert_vertical(&vertical("banking")).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn persona_update_rejects_invalid_region_and_keeps_row() {
        let store = MemoryStore::new();
        let v = vertical("banking");
        store.insert_vertical(&v).await.unwrap();
        let now = Utc::now();
        let sv = SubVertical {
            id: Uuid::new_v4(),
            vertical_id: v.id,
            key: "retail".into(),
            name: "Retail".into(),
            default_agent: "retail_agent".into(),
            primary_entity_type: EntityType::Individual,
            related_entity_types: vec![],
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_sub_vertical(&sv).await.unwrap();
        let persona = Persona {
            id: Uuid::new_v4(),
            sub_vertical_id: sv.id,
            key: "rm".into(),
            name: "RM".into(),
            mission: None,
            decision_lens: None,
            scope: PersonaScope::Local,
            region_code: Some("UAE".into()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_persona(&persona).await.unwrap();

        let patch = PersonaPatch {
            region_code: Some(Some("EMEA".into())),
            ..Default::default()
        };
        let err = store.update_persona(persona.id, &patch, Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), "REGION_SCOPE_MISMATCH");
        assert_eq!(store.get_persona(persona.id).await.unwrap().unwrap(), persona);
    }

    #[tokio::test]
    async fn audit_chain_links_and_detects_tampering() {
        let store = MemoryStore::new();
        let actor = Actor::new("ops", None);
        for _ in 0..3 {
            store
                .append_audit(AuditDraft::success(
                    &actor,
                    AuditAction::VerticalCreate,
                    EntityKind::Vertical,
                    None,
                    serde_json::json!({}),
                    serde_json::json!({}),
                ))
                .await
                .unwrap();
        }
        assert!(store.verify_chain(100).await.unwrap().chain_valid);
        store.tamper_audit(1, |e| e.action = AuditAction::PolicyActivate);
        let integrity = store.verify_chain(100).await.unwrap();
        assert_eq!(integrity.total, 3);
        assert_eq!(integrity.broken_links, 1);
    }

    #[tokio::test]
    async fn verify_window_covers_newest_entries() {
        let store = MemoryStore::new();
        let actor = Actor::new("ops", None);
        for i in 0..5 {
            store
                .append_audit(AuditDraft::success(
                    &actor,
                    AuditAction::VerticalCreate,
                    EntityKind::Vertical,
                    Some(format!("v{i}")),
                    serde_json::json!({}),
                    serde_json::json!({}),
                ))
                .await
                .unwrap();
        }
        let integrity = store.verify_chain(2).await.unwrap();
        assert_eq!(integrity.total, 2);
        assert!(integrity.chain_valid);

        store.tamper_audit(0, |e| e.actor = "mallory".into());
        assert!(store.verify_chain(2).await.unwrap().chain_valid);
        store.tamper_audit(4, |e| e.request = serde_json::json!({ "forged": true }));
        assert_eq!(store.verify_chain(2).await.unwrap().broken_links, 1);
    }

    #[tokio::test]
    async fn audit_query_pages_newest_first() {
        let store = MemoryStore::new();
        let actor = Actor::new("ops", None);
        for i in 0..5 {
            store
                .append_audit(AuditDraft::success(
                    &actor,
                    AuditAction::VerticalCreate,
                    EntityKind::Vertical,
                    Some(format!("v{i}")),
                    serde_json::json!({}),
                    serde_json::json!({}),
                ))
                .await
                .unwrap();
        }
        let page = store
            .query_audit(&AuditQuery {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<_> = page.entries.iter().filter_map(|e| e.target_id.clone()).collect();
        assert_eq!(ids, vec!["v3", "v2"]);
        assert_eq!(page.distinct_actions, vec![AuditAction::VerticalCreate]);
        assert_eq!(page.distinct_target_types, vec![EntityKind::Vertical]);
    }
}
