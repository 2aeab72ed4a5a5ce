//! # Entity Records
//!
//! The persisted shape of the configuration hierarchy:
//!
//! ```text
//! WorkspaceBinding ─▶ Vertical ─▶ SubVertical ─▶ Persona ─▶ Policy (cplane-state)
//! ```
//!
//! Records are plain data. Patches carry only the mutable fields of their
//! record; applying a patch can never touch a key, an owner id or an entity
//! type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identity::{TenantId, WorkspaceId};
use crate::region::{validate_region_for_scope, RegionCheck};

/// Serde helper for `Option<Option<T>>` patch fields: an absent field stays
/// `None`, an explicit `null` becomes `Some(None)`. Pair it with
/// `#[serde(default)]`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// What a vertical or sub-vertical reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Deal,
    Company,
    Individual,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deal => "deal",
            Self::Company => "company",
            Self::Individual => "individual",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deal" => Ok(Self::Deal),
            "company" => Ok(Self::Company),
            "individual" => Ok(Self::Individual),
            other => Err(format!(
                "unknown entity type {other:?}, expected deal, company or individual"
            )),
        }
    }
}

/// Geographic scope of a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersonaScope {
    Local,
    Regional,
    Global,
}

impl PersonaScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Regional => "REGIONAL",
            Self::Global => "GLOBAL",
        }
    }
}

impl std::fmt::Display for PersonaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PersonaScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(Self::Local),
            "REGIONAL" => Ok(Self::Regional),
            "GLOBAL" => Ok(Self::Global),
            other => Err(format!(
                "unknown scope {other:?}, expected LOCAL, REGIONAL or GLOBAL"
            )),
        }
    }
}

/// Top-level industry grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Vertical {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub entity_type: EntityType,
    pub region_scope: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Specialization of a vertical with its own entity focus and default agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubVertical {
    pub id: Uuid,
    pub vertical_id: Uuid,
    pub key: String,
    pub name: String,
    pub default_agent: String,
    pub primary_entity_type: EntityType,
    pub related_entity_types: Vec<EntityType>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named reasoning profile bound to a sub-vertical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Persona {
    pub id: Uuid,
    pub sub_vertical_id: Uuid,
    pub key: String,
    pub name: String,
    pub mission: Option<String>,
    pub decision_lens: Option<String>,
    pub scope: PersonaScope,
    pub region_code: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    /// Check the persona's region against its scope.
    pub fn region_check(&self) -> RegionCheck {
        validate_region_for_scope(self.scope, self.region_code.as_deref())
    }

    pub fn validate_region(&self) -> Result<(), ValidationError> {
        self.region_check()
            .into_result()
            .map_err(|source| ValidationError::Region {
                field: "region_code",
                source,
            })
    }
}

/// Attaches one tenant workspace to a (vertical, sub-vertical, persona) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceBinding {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub workspace_id: WorkspaceId,
    pub vertical_id: Uuid,
    pub sub_vertical_id: Uuid,
    pub persona_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceBinding {
    /// Whether the binding points at the given entity anywhere in its chain.
    pub fn references(&self, id: Uuid) -> bool {
        self.vertical_id == id || self.sub_vertical_id == id || self.persona_id == id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerticalPatch {
    pub name: Option<String>,
    pub region_scope: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubVerticalPatch {
    pub name: Option<String>,
    pub default_agent: Option<String>,
    pub related_entity_types: Option<Vec<EntityType>>,
    pub is_active: Option<bool>,
}

/// `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaPatch {
    pub name: Option<String>,
    pub mission: Option<Option<String>>,
    pub decision_lens: Option<Option<String>>,
    pub scope: Option<PersonaScope>,
    pub region_code: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPatch {
    pub vertical_id: Option<Uuid>,
    pub sub_vertical_id: Option<Uuid>,
    pub persona_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

impl Vertical {
    pub fn apply(&mut self, patch: &VerticalPatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(scope) = &patch.region_scope {
            self.region_scope = scope.clone();
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
    }
}

impl SubVertical {
    pub fn apply(&mut self, patch: &SubVerticalPatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(agent) = &patch.default_agent {
            self.default_agent = agent.clone();
        }
        if let Some(related) = &patch.related_entity_types {
            self.related_entity_types = related.clone();
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
    }
}

impl Persona {
    pub fn apply(&mut self, patch: &PersonaPatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(mission) = &patch.mission {
            self.mission = mission.clone();
        }
        if let Some(lens) = &patch.decision_lens {
            self.decision_lens = lens.clone();
        }
        if let Some(scope) = patch.scope {
            self.scope = scope;
        }
        if let Some(region) = &patch.region_code {
            self.region_code = region.clone();
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
    }
}

impl WorkspaceBinding {
    pub fn apply(&mut self, patch: &BindingPatch, now: DateTime<Utc>) {
        if let Some(id) = patch.vertical_id {
            self.vertical_id = id;
        }
        if let Some(id) = patch.sub_vertical_id {
            self.sub_vertical_id = id;
        }
        if let Some(id) = patch.persona_id {
            self.persona_id = id;
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
    }
}

/// Active bindings affected by deactivating an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BlastRadius {
    pub active_bindings: u64,
}

/// Outcome of an update: the row before and after the patch.
///
/// `blast_radius` is set only when the update flipped `is_active` from
/// true to false, and is counted under the same lock or transaction as the
/// write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Updated<T> {
    pub before: T,
    pub after: T,
    pub blast_radius: Option<BlastRadius>,
}

impl<T> Updated<T> {
    pub fn into_after(self) -> T {
        self.after
    }
}

/// Whether a patch deactivates a currently active row.
pub fn is_deactivation(was_active: bool, patch_is_active: Option<bool>) -> bool {
    was_active && patch_is_active == Some(false)
}
