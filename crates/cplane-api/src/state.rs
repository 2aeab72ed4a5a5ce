//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor. Every fact lives behind the
//! [`ControlPlane`] services; the state itself holds only handles.

use metrics_exporter_prometheus::PrometheusHandle;

use cplane_engine::{ControlPlane, EngineConfig};

#[derive(Clone)]
pub struct AppState {
    pub control_plane: ControlPlane,
    /// Render handle for `/metrics`. `None` when metrics are disabled.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(control_plane: ControlPlane, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            control_plane,
            metrics,
        }
    }

    /// In-memory services, metrics disabled. Used in development and tests.
    pub fn in_memory() -> Self {
        Self::new(ControlPlane::in_memory(EngineConfig::default()), None)
    }
}
