//! # Audit Records
//!
//! Append-only audit entries, the query shape used to read them back and the
//! SHA-256 hash chain that makes the log tamper-evident.
//!
//! Each sealed entry stores the hash of its predecessor and its own hash:
//!
//! ```text
//! entry_hash = SHA-256(previous_hash ‖ actor ‖ tenant_id ‖ action ‖ target_type ‖ target_id
//!                      ‖ request ‖ result ‖ success ‖ error_code ‖ error_message ‖ created_at)
//! ```
//!
//! Every field is length-prefixed; JSON payloads are hashed in their compact
//! serialization with sorted keys. The first entry chains to [`GENESIS_HASH`].

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use serde_json::Value;

use crate::error::{ControlPlaneError, EntityKind};
use crate::identity::TenantId;

/// Chain anchor for the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Default page size for audit queries.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Upper bound on a single audit page.
pub const MAX_PAGE_SIZE: u32 = 500;

/// The verified caller performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub tenant_id: Option<TenantId>,
}

impl Actor {
    pub fn new(id: impl Into<String>, tenant_id: Option<TenantId>) -> Self {
        Self {
            id: id.into(),
            tenant_id,
        }
    }
}

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum AuditAction {
    #[serde(rename = "vertical.create")]
    VerticalCreate,
    #[serde(rename = "vertical.update")]
    VerticalUpdate,
    #[serde(rename = "sub_vertical.create")]
    SubVerticalCreate,
    #[serde(rename = "sub_vertical.update")]
    SubVerticalUpdate,
    #[serde(rename = "persona.create")]
    PersonaCreate,
    #[serde(rename = "persona.update")]
    PersonaUpdate,
    #[serde(rename = "policy.create")]
    PolicyCreate,
    #[serde(rename = "policy.edit")]
    PolicyEdit,
    #[serde(rename = "policy.stage")]
    PolicyStage,
    #[serde(rename = "policy.activate")]
    PolicyActivate,
    #[serde(rename = "policy.rollback")]
    PolicyRollback,
    #[serde(rename = "binding.create")]
    BindingCreate,
    #[serde(rename = "binding.update")]
    BindingUpdate,
    #[serde(rename = "resolution.failed")]
    ResolutionFailed,
}

impl AuditAction {
    pub const ALL: [AuditAction; 14] = [
        Self::VerticalCreate,
        Self::VerticalUpdate,
        Self::SubVerticalCreate,
        Self::SubVerticalUpdate,
        Self::PersonaCreate,
        Self::PersonaUpdate,
        Self::PolicyCreate,
        Self::PolicyEdit,
        Self::PolicyStage,
        Self::PolicyActivate,
        Self::PolicyRollback,
        Self::BindingCreate,
        Self::BindingUpdate,
        Self::ResolutionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerticalCreate => "vertical.create",
            Self::VerticalUpdate => "vertical.update",
            Self::SubVerticalCreate => "sub_vertical.create",
            Self::SubVerticalUpdate => "sub_vertical.update",
            Self::PersonaCreate => "persona.create",
            Self::PersonaUpdate => "persona.update",
            Self::PolicyCreate => "policy.create",
            Self::PolicyEdit => "policy.edit",
            Self::PolicyStage => "policy.stage",
            Self::PolicyActivate => "policy.activate",
            Self::PolicyRollback => "policy.rollback",
            Self::BindingCreate => "binding.create",
            Self::BindingUpdate => "binding.update",
            Self::ResolutionFailed => "resolution.failed",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown audit action {s:?}"))
    }
}

/// An audit entry before it is linked into the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub actor: String,
    pub tenant_id: Option<TenantId>,
    pub action: AuditAction,
    pub target_type: EntityKind,
    pub target_id: Option<String>,
    pub request: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditDraft {
    /// A successful operation.
    pub fn success(
        actor: &Actor,
        action: AuditAction,
        target_type: EntityKind,
        target_id: Option<String>,
        request: serde_json::Value,
        result: serde_json::Value,
    ) -> Self {
        Self {
            actor: actor.id.clone(),
            tenant_id: actor.tenant_id,
            action,
            target_type,
            target_id,
            request,
            result,
            success: true,
            error_code: None,
            error_message: None,
            created_at: audit_now(),
        }
    }

    /// A failed operation. `Internal` messages are not persisted verbatim.
    pub fn failure(
        actor: &Actor,
        action: AuditAction,
        target_type: EntityKind,
        target_id: Option<String>,
        request: serde_json::Value,
        error: &ControlPlaneError,
    ) -> Self {
        let message = match error {
            ControlPlaneError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        Self::rejected(actor, action, target_type, target_id, request, error.code(), message)
    }

    /// A failed operation identified by a bare error code, for rejections
    /// raised outside [`ControlPlaneError`] (authorization, request decoding).
    pub fn rejected(
        actor: &Actor,
        action: AuditAction,
        target_type: EntityKind,
        target_id: Option<String>,
        request: serde_json::Value,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.id.clone(),
            tenant_id: actor.tenant_id,
            action,
            target_type,
            target_id,
            request,
            result: serde_json::Value::Null,
            success: false,
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
            created_at: audit_now(),
        }
    }

    /// Link the draft after `previous_hash`.
    pub fn seal(self, id: Uuid, previous_hash: &str) -> AuditEntry {
        let entry_hash = HashInput {
            actor: &self.actor,
            tenant_id: self.tenant_id,
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id.as_deref(),
            request: &self.request,
            result: &self.result,
            success: self.success,
            error_code: self.error_code.as_deref(),
            error_message: self.error_message.as_deref(),
            created_at: &self.created_at,
        }
        .digest(previous_hash);
        AuditEntry {
            id,
            actor: self.actor,
            tenant_id: self.tenant_id,
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id,
            request: self.request,
            result: self.result,
            success: self.success,
            error_code: self.error_code,
            error_message: self.error_message,
            previous_hash: previous_hash.to_string(),
            entry_hash,
            created_at: self.created_at,
        }
    }
}

/// Timestamps are truncated to microseconds so they survive a Postgres
/// round-trip and the recomputed hash still matches.
fn audit_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A sealed, immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: String,
    pub tenant_id: Option<TenantId>,
    pub action: AuditAction,
    pub target_type: EntityKind,
    pub target_id: Option<String>,
    pub request: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub previous_hash: String,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Recompute this entry's hash from its own fields.
    pub fn recompute_hash(&self) -> String {
        HashInput {
            actor: &self.actor,
            tenant_id: self.tenant_id,
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id.as_deref(),
            request: &self.request,
            result: &self.result,
            success: self.success,
            error_code: self.error_code.as_deref(),
            error_message: self.error_message.as_deref(),
            created_at: &self.created_at,
        }
        .digest(&self.previous_hash)
    }
}

/// The fields covered by `entry_hash`, in hashing order.
struct HashInput<'a> {
    actor: &'a str,
    tenant_id: Option<TenantId>,
    action: AuditAction,
    target_type: EntityKind,
    target_id: Option<&'a str>,
    request: &'a Value,
    result: &'a Value,
    success: bool,
    error_code: Option<&'a str>,
    error_message: Option<&'a str>,
    created_at: &'a DateTime<Utc>,
}

impl HashInput<'_> {
    fn digest(&self, previous_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, previous_hash.as_bytes());
        hash_field(&mut hasher, self.actor.as_bytes());
        hash_optional(&mut hasher, self.tenant_id.map(|t| t.to_string()).as_deref());
        hash_field(&mut hasher, self.action.as_str().as_bytes());
        hash_field(&mut hasher, self.target_type.as_str().as_bytes());
        hash_optional(&mut hasher, self.target_id);
        hash_field(&mut hasher, self.request.to_string().as_bytes());
        hash_field(&mut hasher, self.result.to_string().as_bytes());
        hash_field(&mut hasher, if self.success { b"1" } else { b"0" });
        hash_optional(&mut hasher, self.error_code);
        hash_optional(&mut hasher, self.error_message);
        hash_field(
            &mut hasher,
            self.created_at
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .as_bytes(),
        );
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// `None` and `Some("")` hash differently.
fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hash_field(hasher, v.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

/// Result of walking the newest stretch of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainIntegrity {
    pub total: usize,
    pub broken_links: usize,
    pub chain_valid: bool,
}

/// Count broken links in `entries`, which must be ordered oldest first and
/// follow the entry whose hash is `anchor` ([`GENESIS_HASH`] when `entries`
/// starts at the head of the log).
///
/// A link is broken when an entry's `previous_hash` does not match its
/// predecessor's `entry_hash`, or when its stored hash no longer matches
/// its fields.
pub fn verify_links(anchor: &str, entries: &[AuditEntry]) -> ChainIntegrity {
    let mut broken_links = 0;
    let mut last_hash = anchor;
    for entry in entries {
        if entry.previous_hash != last_hash || entry.recompute_hash() != entry.entry_hash {
            broken_links += 1;
        }
        last_hash = &entry.entry_hash;
    }
    ChainIntegrity {
        total: entries.len(),
        broken_links,
        chain_valid: broken_links == 0,
    }
}

/// Filters and pagination for reading the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub target_type: Option<EntityKind>,
    pub actor: Option<String>,
    pub target_id: Option<String>,
    pub tenant_id: Option<TenantId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// Whether `entry` passes every filter. `from` is inclusive, `to` exclusive.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self.target_type.map_or(true, |t| entry.target_type == t)
            && self.actor.as_deref().map_or(true, |a| entry.actor == a)
            && self
                .target_id
                .as_deref()
                .map_or(true, |t| entry.target_id.as_deref() == Some(t))
            && self
                .tenant_id
                .map_or(true, |t| entry.tenant_id == Some(t))
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at < to)
    }
}

/// One page of audit entries, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: u64,
    pub distinct_actions: Vec<AuditAction>,
    pub distinct_target_types: Vec<EntityKind>,
}
