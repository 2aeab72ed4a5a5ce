//! End-to-end service tests against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use cplane_core::{
    Actor, AuditAction, AuditDraft, AuditEntry, AuditPage, AuditQuery, ChainIntegrity,
    ControlPlaneError, EntityKind, Persona, ResolutionKind, SubVertical, TenantId, Vertical,
    WorkspaceId,
};
use cplane_engine::input::{
    CreateBindingInput, CreatePersonaInput, CreateSubVerticalInput, CreateVerticalInput,
    RollbackInput, UpdateBindingInput, UpdatePersonaInput, UpdateSubVerticalInput,
    UpdateVerticalInput,
};
use cplane_engine::{ControlPlane, EngineConfig};
use cplane_state::{PolicyChain, PolicyPatch, PolicyStatus};
use cplane_store::{AuditStore, MemoryStore, StoreResult};

struct Fixture {
    cp: ControlPlane,
    store: Arc<MemoryStore>,
    actor: Actor,
    tenant: TenantId,
}

struct Chain {
    vertical: Vertical,
    sub_vertical: SubVertical,
    persona: Persona,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let cp = ControlPlane::new(store.clone(), store.clone(), EngineConfig::default());
    let tenant = TenantId::from_uuid(Uuid::new_v4());
    Fixture {
        cp,
        store,
        actor: Actor::new("admin@acme", Some(tenant)),
        tenant,
    }
}

fn permissions() -> PolicyPatch {
    PolicyPatch {
        allowed_intents: Some(vec!["discover".into(), "enrich".into()]),
        allowed_tools: Some(vec!["crm_lookup".into()]),
        ..Default::default()
    }
}

async fn banking_chain(f: &Fixture) -> Chain {
    let entities = f.cp.entities();
    let vertical = entities
        .create_vertical(
            &f.actor,
            CreateVerticalInput {
                key: Some("banking".into()),
                name: Some("Banking".into()),
                entity_type: Some("company".into()),
                region_scope: Some(vec!["UAE".into(), "EMEA".into()]),
            },
        )
        .await
        .unwrap();
    let sub_vertical = entities
        .create_sub_vertical(
            &f.actor,
            vertical.id,
            CreateSubVerticalInput {
                key: Some("employee_banking".into()),
                name: Some("Employee Banking".into()),
                default_agent: Some("eb_agent".into()),
                primary_entity_type: Some("company".into()),
                related_entity_types: Some(vec!["individual".into()]),
            },
        )
        .await
        .unwrap();
    let persona = entities
        .create_persona(
            &f.actor,
            sub_vertical.id,
            CreatePersonaInput {
                key: Some("eb-relationship-manager".into()),
                name: Some("EB Relationship Manager".into()),
                mission: Some("Grow payroll accounts".into()),
                decision_lens: Some("employer size".into()),
                scope: Some("LOCAL".into()),
                region_code: Some("UAE".into()),
            },
        )
        .await
        .unwrap();
    Chain {
        vertical,
        sub_vertical,
        persona,
    }
}

async fn bind(f: &Fixture, chain: &Chain, workspace: WorkspaceId) {
    f.cp.entities()
        .create_binding(
            &f.actor,
            f.tenant,
            workspace,
            CreateBindingInput {
                vertical_id: Some(chain.vertical.id),
                sub_vertical_id: Some(chain.sub_vertical.id),
                persona_id: Some(chain.persona.id),
            },
        )
        .await
        .unwrap();
}

async fn active_policy(f: &Fixture, persona_id: Uuid) -> Uuid {
    let lifecycle = f.cp.lifecycle();
    let policy = lifecycle
        .create(&f.actor, persona_id, Some(permissions()))
        .await
        .unwrap();
    lifecycle.stage(&f.actor, policy.id).await.unwrap();
    lifecycle.activate(&f.actor, policy.id).await.unwrap();
    policy.id
}

fn resolution_kind(err: &ControlPlaneError) -> ResolutionKind {
    match err {
        ControlPlaneError::Resolution(failure) => failure.kind,
        other => panic!("expected a resolution failure, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_banking_workspace_resolves_active_policy() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    active_policy(&f, chain.persona.id).await;
    let workspace = WorkspaceId::from_uuid(Uuid::new_v4());
    bind(&f, &chain, workspace).await;

    let config = f
        .cp
        .resolver()
        .resolve(&f.actor, f.tenant, workspace)
        .await
        .unwrap();
    assert_eq!(config.policy.status, PolicyStatus::Active);
    assert_eq!(config.policy.policy_version, 1);
    assert_eq!(config.policy.allowed_intents, vec!["discover", "enrich"]);
    assert_eq!(config.vertical.key, "banking");
    assert_eq!(config.sub_vertical.key, "employee_banking");
    assert_eq!(config.persona.key, "eb-relationship-manager");
    assert_eq!(config.persona.region_code.as_deref(), Some("UAE"));
    assert_eq!(config.resolution_method, "workspace_binding");
    assert_eq!(config.tenant_id, f.tenant);
}

#[tokio::test]
async fn scenario_b_local_persona_rejects_regional_code() {
    let f = fixture();
    let chain = banking_chain(&f).await;

    let err = f
        .cp
        .entities()
        .create_persona(
            &f.actor,
            chain.sub_vertical.id,
            CreatePersonaInput {
                key: Some("eb-analyst".into()),
                name: Some("Analyst".into()),
                scope: Some("LOCAL".into()),
                region_code: Some("EMEA".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REGION_SCOPE_MISMATCH");

    let err = f
        .cp
        .entities()
        .update_persona(
            &f.actor,
            chain.persona.id,
            UpdatePersonaInput {
                region_code: Some(Some("EMEA".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REGION_SCOPE_MISMATCH");
    let persona = f.cp.entities().get_persona(chain.persona.id).await.unwrap();
    assert_eq!(persona, chain.persona);
}

#[tokio::test]
async fn scenario_c_unbound_workspace_is_binding_not_found() {
    let f = fixture();
    let workspace = WorkspaceId::from_uuid(Uuid::new_v4());
    let err = f
        .cp
        .resolver()
        .resolve(&f.actor, f.tenant, workspace)
        .await
        .unwrap_err();
    assert_eq!(resolution_kind(&err), ResolutionKind::BindingNotFound);

    let page = f
        .cp
        .audit()
        .query(&AuditQuery {
            action: Some(AuditAction::ResolutionFailed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    let entry = &page.entries[0];
    assert_eq!(entry.error_code.as_deref(), Some("BINDING_NOT_FOUND"));
    assert_eq!(entry.target_id.as_deref(), Some(workspace.to_string().as_str()));
    assert_eq!(entry.tenant_id, Some(f.tenant));
}

#[tokio::test]
async fn scenario_d_deactivated_persona_is_persona_inactive() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    active_policy(&f, chain.persona.id).await;
    let workspace = WorkspaceId::from_uuid(Uuid::new_v4());
    bind(&f, &chain, workspace).await;

    let updated = f
        .cp
        .entities()
        .update_persona(
            &f.actor,
            chain.persona.id,
            UpdatePersonaInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!updated.after.is_active);
    assert_eq!(updated.blast_radius.map(|r| r.active_bindings), Some(1));

    let page = f
        .cp
        .audit()
        .query(&AuditQuery {
            action: Some(AuditAction::PersonaUpdate),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.entries[0].result["blast_radius"]["active_bindings"], 1);

    let err = f
        .cp
        .resolver()
        .resolve(&f.actor, f.tenant, workspace)
        .await
        .unwrap_err();
    assert_eq!(resolution_kind(&err), ResolutionKind::PersonaInactive);
}

#[tokio::test]
async fn deactivation_blast_radius_counts_active_bindings_at_every_level() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    active_policy(&f, chain.persona.id).await;
    let workspaces: Vec<_> = (0..3).map(|_| WorkspaceId::from_uuid(Uuid::new_v4())).collect();
    for workspace in &workspaces {
        bind(&f, &chain, *workspace).await;
    }
    f.cp.entities()
        .update_binding(
            &f.actor,
            f.tenant,
            workspaces[2],
            UpdateBindingInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let entities = f.cp.entities();
    let sub_vertical = entities
        .update_sub_vertical(
            &f.actor,
            chain.sub_vertical.id,
            UpdateSubVerticalInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(sub_vertical.blast_radius.map(|r| r.active_bindings), Some(2));

    let persona = entities
        .update_persona(
            &f.actor,
            chain.persona.id,
            UpdatePersonaInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(persona.blast_radius.map(|r| r.active_bindings), Some(2));

    let vertical = entities
        .update_vertical(
            &f.actor,
            chain.vertical.id,
            UpdateVerticalInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(vertical.blast_radius.map(|r| r.active_bindings), Some(2));

    // Already inactive: no deactivation, no blast radius.
    let renamed = entities
        .update_sub_vertical(
            &f.actor,
            chain.sub_vertical.id,
            UpdateSubVerticalInput {
                name: Some("Payroll Banking".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(renamed.blast_radius.is_none());

    let targets = [
        (AuditAction::SubVerticalUpdate, chain.sub_vertical.id),
        (AuditAction::PersonaUpdate, chain.persona.id),
        (AuditAction::VerticalUpdate, chain.vertical.id),
    ];
    for (action, target) in targets {
        let page = f
            .cp
            .audit()
            .query(&AuditQuery {
                action: Some(action),
                target_id: Some(target.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let deactivation = page.entries.last().unwrap();
        assert!(deactivation.success, "{action}");
        assert_eq!(deactivation.result["after"]["is_active"], false, "{action}");
        assert_eq!(deactivation.result["blast_radius"]["active_bindings"], 2, "{action}");
        assert_eq!(
            deactivation.result["blast_radius"]["warning"],
            "deactivation affects 2 active workspace binding(s)"
        );
    }

    let renames = f
        .cp
        .audit()
        .query(&AuditQuery {
            action: Some(AuditAction::SubVerticalUpdate),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(renames.total, 2);
    assert!(renames.entries[0].result.get("blast_radius").is_none());
}

// ---------------------------------------------------------------------------
// Lifecycle properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_intents_fail_emp_001_before_tools() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let lifecycle = f.cp.lifecycle();
    let policy = lifecycle.create(&f.actor, chain.persona.id, None).await.unwrap();

    let err = lifecycle.stage(&f.actor, policy.id).await.unwrap_err();
    assert_eq!(err.code(), "EMP-001");

    let edited = lifecycle
        .edit(
            &f.actor,
            policy.id,
            PolicyPatch {
                allowed_intents: Some(vec!["discover".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.id, policy.id, "DRAFT edits stay in place");
    let err = lifecycle.stage(&f.actor, policy.id).await.unwrap_err();
    assert_eq!(err.code(), "EMP-002");
}

#[tokio::test]
async fn staging_twice_is_a_noop() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let lifecycle = f.cp.lifecycle();
    let policy = lifecycle
        .create(&f.actor, chain.persona.id, Some(permissions()))
        .await
        .unwrap();
    let first = lifecycle.stage(&f.actor, policy.id).await.unwrap();
    let second = lifecycle.stage(&f.actor, policy.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(lifecycle.versions(chain.persona.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn activate_twice_fails_for_non_staged() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let id = active_policy(&f, chain.persona.id).await;
    let err = f.cp.lifecycle().activate(&f.actor, id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn editing_active_policy_forks_new_draft() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let lifecycle = f.cp.lifecycle();
    let v1 = active_policy(&f, chain.persona.id).await;

    let v2 = lifecycle
        .edit(
            &f.actor,
            v1,
            PolicyPatch {
                forbidden_outputs: Some(vec!["pricing".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_ne!(v2.id, v1);
    assert_eq!(v2.policy_version, 2);
    assert_eq!(v2.status, PolicyStatus::Draft);
    assert_eq!(v2.allowed_intents, vec!["discover", "enrich"]);

    let original = lifecycle.get(v1).await.unwrap();
    assert_eq!(original.status, PolicyStatus::Active);
    assert!(original.forbidden_outputs.is_empty());
}

#[tokio::test]
async fn rollback_restores_previous_version() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let lifecycle = f.cp.lifecycle();
    let v1 = active_policy(&f, chain.persona.id).await;
    let v2 = lifecycle
        .edit(
            &f.actor,
            v1,
            PolicyPatch {
                allowed_tools: Some(vec!["crm_lookup".into(), "news_search".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    lifecycle.stage(&f.actor, v2.id).await.unwrap();
    lifecycle.activate(&f.actor, v2.id).await.unwrap();

    for _ in 0..2 {
        let restored = lifecycle
            .rollback(
                &f.actor,
                chain.persona.id,
                RollbackInput {
                    target_version: Some(1),
                },
            )
            .await;
        if let Ok(restored) = restored {
            assert_eq!(restored.id, v1);
            assert_eq!(restored.status, PolicyStatus::Active);
        } else {
            // v1 is already ACTIVE on the second pass.
            assert_eq!(restored.unwrap_err().code(), "INVALID_TRANSITION");
        }
        let versions = lifecycle.versions(chain.persona.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        let active: Vec<_> = versions
            .iter()
            .filter(|p| p.status == PolicyStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, v1);
        assert_eq!(versions[1].status, PolicyStatus::Deprecated);
    }

    let err = lifecycle
        .rollback(
            &f.actor,
            chain.persona.id,
            RollbackInput {
                target_version: Some(9),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

/// Activate a fresh version, roll back to v1, then repeat that round trip
/// `REPEATS` more times.
#[tokio::test]
async fn repeated_round_trips_keep_one_active_and_unique_versions() {
    const REPEATS: usize = 3;
    let f = fixture();
    let chain = banking_chain(&f).await;
    let lifecycle = f.cp.lifecycle();
    let v1 = active_policy(&f, chain.persona.id).await;

    for pass in 0..=REPEATS {
        let draft = lifecycle
            .edit(
                &f.actor,
                v1,
                PolicyPatch {
                    allowed_tools: Some(vec!["crm_lookup".into(), format!("tool_{pass}")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(draft.status, PolicyStatus::Draft);
        lifecycle.stage(&f.actor, draft.id).await.unwrap();
        let activated = lifecycle.activate(&f.actor, draft.id).await.unwrap();
        assert_eq!(activated.status, PolicyStatus::Active);

        let restored = lifecycle
            .rollback(
                &f.actor,
                chain.persona.id,
                RollbackInput {
                    target_version: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(restored.id, v1);
        assert_eq!(restored.status, PolicyStatus::Active);

        let versions = lifecycle.versions(chain.persona.id).await.unwrap();
        let numbers: Vec<i32> = versions.iter().map(|p| p.policy_version).collect();
        assert!(
            numbers.windows(2).all(|w| w[0] < w[1]),
            "pass {pass}: versions not strictly increasing: {numbers:?}"
        );
        let active: Vec<_> = versions
            .iter()
            .filter(|p| p.status == PolicyStatus::Active)
            .collect();
        assert_eq!(active.len(), 1, "pass {pass}");
        assert_eq!(active[0].id, v1);
        let deprecated = versions
            .iter()
            .filter(|p| p.status == PolicyStatus::Deprecated)
            .count();
        assert_eq!(deprecated, pass + 1, "pass {pass}");
        assert_eq!(versions.len(), pass + 2);
    }

    let versions = lifecycle.versions(chain.persona.id).await.unwrap();
    let non_active = versions
        .iter()
        .filter(|p| p.status != PolicyStatus::Active)
        .count();
    assert_eq!(non_active, REPEATS + 1);
    assert_eq!(versions.last().unwrap().policy_version, (REPEATS + 2) as i32);
}

#[tokio::test]
async fn second_create_on_existing_chain_conflicts() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let lifecycle = f.cp.lifecycle();
    lifecycle.create(&f.actor, chain.persona.id, None).await.unwrap();
    let err = lifecycle.create(&f.actor, chain.persona.id, None).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    let err = lifecycle.create(&f.actor, Uuid::new_v4(), None).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Entities and bindings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vertical_key_is_immutable() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let err = f
        .cp
        .entities()
        .update_vertical(
            &f.actor,
            chain.vertical.id,
            UpdateVerticalInput {
                key: Some("retail".into()),
                name: Some("Retail".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ControlPlaneError::ImmutableField {
            entity: EntityKind::Vertical,
            field: "key"
        }
    );
    let reread = f.cp.entities().get_vertical(chain.vertical.id).await.unwrap();
    assert_eq!(reread, chain.vertical);
}

#[tokio::test]
async fn duplicate_sub_vertical_key_conflicts_and_missing_parent_is_not_found() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let input = CreateSubVerticalInput {
        key: Some("employee_banking".into()),
        name: Some("Again".into()),
        default_agent: Some("eb_agent".into()),
        primary_entity_type: Some("company".into()),
        related_entity_types: None,
    };
    let err = f
        .cp
        .entities()
        .create_sub_vertical(&f.actor, chain.vertical.id, input.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    let err = f
        .cp
        .entities()
        .create_sub_vertical(&f.actor, Uuid::new_v4(), input)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn binding_rejects_persona_from_another_sub_vertical() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let other = f
        .cp
        .entities()
        .create_sub_vertical(
            &f.actor,
            chain.vertical.id,
            CreateSubVerticalInput {
                key: Some("corporate_banking".into()),
                name: Some("Corporate Banking".into()),
                default_agent: Some("cb_agent".into()),
                primary_entity_type: Some("company".into()),
                related_entity_types: None,
            },
        )
        .await
        .unwrap();
    let err = f
        .cp
        .entities()
        .create_binding(
            &f.actor,
            f.tenant,
            WorkspaceId::from_uuid(Uuid::new_v4()),
            CreateBindingInput {
                vertical_id: Some(chain.vertical.id),
                sub_vertical_id: Some(other.id),
                persona_id: Some(chain.persona.id),
            },
        )
        .await
        .unwrap_err();
    match err {
        ControlPlaneError::Validation(v) => assert_eq!(v.field(), "persona_id"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn binding_is_scoped_to_its_tenant() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    active_policy(&f, chain.persona.id).await;
    let workspace = WorkspaceId::from_uuid(Uuid::new_v4());
    bind(&f, &chain, workspace).await;

    let intruder = TenantId::from_uuid(Uuid::new_v4());
    let err = f
        .cp
        .resolver()
        .resolve(&Actor::new("other@evil", Some(intruder)), intruder, workspace)
        .await
        .unwrap_err();
    assert_eq!(resolution_kind(&err), ResolutionKind::BindingNotFound);
    assert!(!err.to_string().contains(&chain.persona.id.to_string()));
}

#[tokio::test]
async fn deactivated_binding_is_binding_inactive() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    active_policy(&f, chain.persona.id).await;
    let workspace = WorkspaceId::from_uuid(Uuid::new_v4());
    bind(&f, &chain, workspace).await;

    f.cp.entities()
        .update_binding(
            &f.actor,
            f.tenant,
            workspace,
            UpdateBindingInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let err = f
        .cp
        .resolver()
        .resolve(&f.actor, f.tenant, workspace)
        .await
        .unwrap_err();
    assert_eq!(resolution_kind(&err), ResolutionKind::BindingInactive);
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_mutation_writes_one_audit_entry() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    assert_eq!(f.store.audit_len(), 3);

    active_policy(&f, chain.persona.id).await;
    assert_eq!(f.store.audit_len(), 6);

    let _ = f
        .cp
        .entities()
        .create_vertical(&f.actor, CreateVerticalInput::default())
        .await
        .unwrap_err();
    assert_eq!(f.store.audit_len(), 7);

    let page = f.cp.audit().query(&AuditQuery::default()).await.unwrap();
    let failed = &page.entries[0];
    assert!(!failed.success);
    assert_eq!(failed.error_code.as_deref(), Some("VALIDATION_ERROR"));
    assert_eq!(failed.actor, "admin@acme");
    assert!(f.cp.audit().verify(None).await.unwrap().chain_valid);
}

struct FailingAuditStore;

#[async_trait]
impl AuditStore for FailingAuditStore {
    async fn append_audit(&self, _draft: AuditDraft) -> StoreResult<AuditEntry> {
        Err(ControlPlaneError::Internal("audit table unavailable".into()))
    }

    async fn query_audit(&self, _query: &AuditQuery) -> StoreResult<AuditPage> {
        Err(ControlPlaneError::Internal("audit table unavailable".into()))
    }

    async fn verify_chain(&self, _limit: u32) -> StoreResult<ChainIntegrity> {
        Err(ControlPlaneError::Internal("audit table unavailable".into()))
    }
}

#[tokio::test]
async fn audit_failure_never_blocks_the_mutation() {
    let store = Arc::new(MemoryStore::new());
    let cp = ControlPlane::new(store, Arc::new(FailingAuditStore), EngineConfig::default());
    let actor = Actor::new("admin@acme", None);
    let vertical = cp
        .entities()
        .create_vertical(
            &actor,
            CreateVerticalInput {
                key: Some("insurance".into()),
                name: Some("Insurance".into()),
                entity_type: Some("individual".into()),
                region_scope: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(cp.entities().get_vertical(vertical.id).await.unwrap(), vertical);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activations_and_rollbacks_keep_one_active() {
    let f = fixture();
    let chain = banking_chain(&f).await;
    let persona_id = chain.persona.id;
    let v1 = active_policy(&f, persona_id).await;

    let lifecycle = f.cp.lifecycle();
    let mut staged = Vec::new();
    let mut source = v1;
    for i in 0..5 {
        let draft = lifecycle
            .edit(
                &f.actor,
                source,
                PolicyPatch {
                    memory_scope: Some(Some(format!("session-{i}"))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        lifecycle.stage(&f.actor, draft.id).await.unwrap();
        staged.push(draft.id);
        source = draft.id;
    }
    let audited_before = f.store.audit_len();

    let mut tasks = Vec::new();
    for policy_id in staged.iter().copied() {
        let cp = f.cp.clone();
        let actor = f.actor.clone();
        tasks.push(tokio::spawn(async move {
            cp.lifecycle().activate(&actor, policy_id).await.map(|_| ())
        }));
    }
    for _ in 0..3 {
        let cp = f.cp.clone();
        let actor = f.actor.clone();
        tasks.push(tokio::spawn(async move {
            cp.lifecycle()
                .rollback(
                    &actor,
                    persona_id,
                    RollbackInput {
                        target_version: Some(1),
                    },
                )
                .await
                .map(|_| ())
        }));
    }
    let operations = tasks.len();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(err) => assert_eq!(err.code(), "INVALID_TRANSITION"),
        }
    }
    assert!(succeeded >= staged.len());

    let versions = lifecycle.versions(persona_id).await.unwrap();
    assert_eq!(versions.len(), 6);
    assert_eq!(
        versions.iter().filter(|p| p.status == PolicyStatus::Active).count(),
        1
    );
    assert!(versions.iter().all(|p| p.status != PolicyStatus::Staged));
    PolicyChain::new(persona_id, versions).check_invariants().unwrap();

    assert_eq!(f.store.audit_len(), audited_before + operations);
    assert!(f.cp.audit().verify(None).await.unwrap().chain_valid);
}
