//! # cplane-state: Control Plane State Logic
//!
//! Synchronous, I/O-free planning for the two stateful parts of the control
//! plane. Store adapters load the relevant rows under their own lock or
//! transaction, ask this crate what the rows should become, then write the
//! plan back. Both adapters therefore enforce the same invariants.
//!
//! ## Modules
//!
//! - **Policy** (`policy.rs`): `DRAFT → STAGED → ACTIVE → DEPRECATED` with
//!   rollback re-activating a DEPRECATED version. [`PolicyChain`] plans every
//!   transition over one persona's full version chain.
//!
//! - **Resolution** (`resolution.rs`): the ordered, short-circuiting check
//!   table evaluated over one joined [`BindingSnapshot`].

pub mod policy;
pub mod resolution;

pub use policy::{
    ActivationPlan, CostBudget, EditKind, EditPlan, LatencyBudget, Policy, PolicyChain,
    PolicyChange, PolicyPatch, PolicyStatus, StagePlan,
};
pub use resolution::{
    resolve, BindingSnapshot, ResolvedConfig, ResolvedPersona, ResolvedPolicy,
    ResolvedSubVertical, ResolvedVertical, RESOLUTION_METHOD,
};
