//! # cplane-core: Foundational Types for the Control Plane
//!
//! The leaf of the workspace dependency DAG. Defines the records the control
//! plane persists, the rules that validate them, and the error taxonomy every
//! other crate reports through.
//!
//! ## Key Design Principles
//!
//! 1. **Newtypes for tenancy.** `TenantId` and `WorkspaceId` are distinct
//!    types, so a resolver call cannot silently swap the pair.
//!
//! 2. **One error enum.** [`ControlPlaneError`] carries a stable machine code
//!    and an actionable hint for every failure the control plane can report.
//!
//! 3. **Region hierarchy is data.** The region registry is a static table; the
//!    scope validator never panics and never returns `Err`; it reports a
//!    [`region::RegionCheck`].
//!
//! 4. **Patches name only mutable fields.** Immutable fields cannot be
//!    expressed in a patch type, so a store can never apply them.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `cplane-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod audit;
pub mod error;
pub mod identity;
pub mod key;
pub mod model;
pub mod region;

pub use audit::{
    Actor, AuditAction, AuditDraft, AuditEntry, AuditPage, AuditQuery, ChainIntegrity,
};
pub use error::{
    ControlPlaneError, EmptyPolicyField, EntityKind, ResolutionFailure, ResolutionKind,
    ValidationError,
};
pub use identity::{TenantId, WorkspaceId};
pub use model::{
    BindingPatch, BlastRadius, EntityType, Persona, PersonaPatch, PersonaScope, SubVertical,
    SubVerticalPatch, Updated, Vertical, VerticalPatch, WorkspaceBinding,
};
pub use region::{
    is_valid_region_code, validate_region_for_scope, Region, RegionCheck, RegionError, RegionLevel,
};
