//! # cplane-api: Axum API Services
//!
//! The HTTP surface of the control plane, built on Axum/Tower/Tokio.
//!
//! ## Routes
//!
//! - `/v1/verticals/*`, `/v1/sub-verticals/*`, `/v1/personas/*`: catalog
//! - `/v1/personas/{id}/policies*`, `/v1/policies/*`: policy lifecycle
//! - `/v1/workspaces/{workspace_id}/*`: bindings and resolution
//! - `/v1/audit*`: audit log
//! - `/health/*`, `/metrics`, `/openapi.json`: unauthenticated
//!
//! ## Middleware Stack (Tower)
//!
//! TraceLayer → metrics → identity
//!
//! ## Crate Policy
//!
//! - No business logic in route handlers; they delegate to `cplane-engine`.
//! - All errors map to structured HTTP responses via `AppError`.

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use state::AppState;

use crate::auth::IdentityConfig;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes, `/metrics` and `/openapi.json` are mounted outside the
/// identity middleware so they remain accessible without credentials.
pub fn app(state: AppState, identity: IdentityConfig) -> Router {
    let api = Router::new()
        .merge(routes::catalog::router())
        .merge(routes::policies::router())
        .merge(routes::bindings::router())
        .merge(routes::audit::router())
        .layer(from_fn(auth::identity_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(identity));

    let public = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(render_metrics))
        .merge(openapi::router());

    Router::new().merge(public).merge(api).with_state(state)
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 once the backing store answers.
async fn readiness(State(state): State<AppState>) -> Result<&'static str, AppError> {
    state.control_plane.ping().await.map_err(|err| {
        tracing::warn!(error = %err, "readiness check failed");
        AppError::Unavailable("backing store not reachable".into())
    })?;
    Ok("ready")
}

/// Prometheus text exposition.
async fn render_metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or_else(|| AppError::Unavailable("metrics are disabled".into()))
}
