//! # cplane-engine: Control Plane Services
//!
//! The operations of the control plane, written against the
//! [`cplane_store`] ports:
//!
//! - [`EntityStore`]: verticals, sub-verticals, personas and workspace
//!   bindings.
//! - [`PolicyLifecycleManager`]: the versioned policy lifecycle.
//! - [`BindingResolver`]: `(tenant, workspace)` to effective configuration.
//! - [`AuditLog`]: the append-only record of every mutation.
//!
//! Services hold no mutable state of their own; every fact lives in the
//! store. [`ControlPlane`] wires the four together over one store.

pub mod audit;
pub mod entities;
pub mod input;
pub mod lifecycle;
pub mod resolver;

use std::sync::Arc;

pub use audit::AuditLog;
pub use entities::EntityStore;
pub use lifecycle::PolicyLifecycleManager;
pub use resolver::BindingResolver;

use cplane_core::ControlPlaneError;
use cplane_store::{AuditStore, ControlPlaneStore, MemoryStore};

/// Tunables for the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Extra attempts for a resolution read failing with an internal error.
    pub resolve_read_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolve_read_retries: 2,
        }
    }
}

#[derive(Clone)]
pub struct ControlPlane {
    store: Arc<dyn ControlPlaneStore>,
    entities: EntityStore,
    lifecycle: PolicyLifecycleManager,
    resolver: BindingResolver,
    audit: AuditLog,
}

impl ControlPlane {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        audit_store: Arc<dyn AuditStore>,
        config: EngineConfig,
    ) -> Self {
        let audit = AuditLog::new(audit_store);
        Self {
            entities: EntityStore::new(store.clone(), audit.clone()),
            lifecycle: PolicyLifecycleManager::new(store.clone(), audit.clone()),
            resolver: BindingResolver::new(store.clone(), audit.clone(), config.resolve_read_retries),
            audit,
            store,
        }
    }

    /// Everything in one [`MemoryStore`].
    pub fn in_memory(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, config)
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn lifecycle(&self) -> &PolicyLifecycleManager {
        &self.lifecycle
    }

    pub fn resolver(&self) -> &BindingResolver {
        &self.resolver
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Readiness of the backing store.
    pub async fn ping(&self) -> Result<(), ControlPlaneError> {
        self.store.ping().await
    }
}
