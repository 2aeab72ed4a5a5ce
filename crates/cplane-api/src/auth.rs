//! # Caller Identity & Authorization
//!
//! Authentication happens upstream. The gateway either places a verified
//! [`CallerIdentity`] into the request extensions, or, when the service is
//! configured to trust it, forwards the identity as headers:
//!
//! ```text
//! x-tenant-id:  3f0c...   (UUID)
//! x-actor-id:   ops@acme
//! x-actor-role: viewer | editor | admin
//! ```
//!
//! Handlers extract the identity via the `FromRequestParts` impl. The tenant
//! used for bindings and resolution always comes from here, never from the
//! request body or query string.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cplane_core::{Actor, TenantId};

use crate::error::AppError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ROLE_HEADER: &str = "x-actor-role";

// ── Role ────────────────────────────────────────────────────────────────────

/// Roles ordered by privilege: `Viewer < Editor < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Reads and resolution.
    Viewer,
    /// Manages the workspace bindings of its own tenant.
    Editor,
    /// Catalog and policy mutations, audit access.
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub tenant_id: TenantId,
    pub actor_id: String,
    pub role: Role,
}

impl CallerIdentity {
    pub fn has_role(&self, minimum: Role) -> bool {
        self.role >= minimum
    }

    /// The actor recorded in audit entries.
    pub fn actor(&self) -> Actor {
        Actor::new(self.actor_id.clone(), Some(self.tenant_id))
    }
}

/// Reads the identity the middleware placed in extensions. 401 when absent.
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// 403 Forbidden if the caller's role is below `minimum`.
pub fn require_role(caller: &CallerIdentity, minimum: Role) -> Result<(), AppError> {
    if caller.has_role(minimum) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' required, caller has '{}'",
            minimum.as_str(),
            caller.role.as_str()
        )))
    }
}

// ── Identity Configuration ──────────────────────────────────────────────────

/// Injected into request extensions ahead of [`identity_middleware`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConfig {
    pub trust_headers: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, String> {
    let value = headers
        .get(name)
        .ok_or_else(|| format!("missing {name} header"))?
        .to_str()
        .map_err(|_| format!("{name} header is not valid ASCII"))?
        .trim();
    if value.is_empty() {
        return Err(format!("{name} header is empty"));
    }
    Ok(value)
}

/// Build an identity from the gateway headers.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<CallerIdentity, String> {
    let tenant_id = header_str(headers, TENANT_HEADER)?
        .parse::<TenantId>()
        .map_err(|e| format!("invalid {TENANT_HEADER}: {e}"))?;
    let actor_id = header_str(headers, ACTOR_HEADER)?.to_string();
    let role = header_str(headers, ROLE_HEADER)?.parse::<Role>()?;
    Ok(CallerIdentity {
        tenant_id,
        actor_id,
        role,
    })
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Ensure every API request carries a [`CallerIdentity`].
///
/// An identity injected upstream wins. Otherwise the gateway headers are
/// parsed when [`IdentityConfig::trust_headers`] is set, and the request is
/// rejected with 401 when they are missing or malformed.
pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    if request.extensions().get::<CallerIdentity>().is_some() {
        return next.run(request).await;
    }

    let config = request
        .extensions()
        .get::<IdentityConfig>()
        .copied()
        .unwrap_or_default();
    if !config.trust_headers {
        tracing::warn!("authentication failed: no verified caller identity");
        return AppError::Unauthorized("no verified caller identity".into()).into_response();
    }

    match identity_from_headers(request.headers()) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(msg) => {
            tracing::warn!(reason = %msg, "authentication failed: invalid identity headers");
            AppError::Unauthorized(msg).into_response()
        }
    }
}
