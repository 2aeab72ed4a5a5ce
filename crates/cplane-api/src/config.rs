//! # Service Configuration
//!
//! Command-line flags with environment fallbacks. Without `DATABASE_URL`
//! the service runs against the in-memory store.

use std::net::{IpAddr, SocketAddr};

use clap::{ArgAction, Parser, ValueEnum};

use cplane_engine::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Parser)]
#[command(name = "cplane-api", version, about = "Control plane configuration and policy resolution API")]
pub struct AppConfig {
    /// Interface to bind.
    #[arg(long, env = "CPLANE_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// PostgreSQL connection string. Unset runs in-memory.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "CPLANE_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub db_max_connections: u32,

    #[arg(long, env = "CPLANE_LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics at `/metrics`.
    #[arg(long, env = "CPLANE_METRICS_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub metrics_enabled: bool,

    /// Accept `x-tenant-id`, `x-actor-id` and `x-actor-role` from the
    /// gateway when no identity was injected upstream.
    #[arg(long, env = "CPLANE_TRUST_IDENTITY_HEADERS", default_value_t = false, action = ArgAction::Set)]
    pub trust_identity_headers: bool,

    /// Extra attempts for resolution reads failing with an internal error.
    #[arg(long, env = "CPLANE_RESOLVE_READ_RETRIES", default_value_t = 2)]
    pub resolve_read_retries: u32,
}

impl AppConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            resolve_read_retries: self.resolve_read_retries,
        }
    }
}

/// Redacts the database URL, which usually carries a password.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("db_max_connections", &self.db_max_connections)
            .field("log_format", &self.log_format)
            .field("metrics_enabled", &self.metrics_enabled)
            .field("trust_identity_headers", &self.trust_identity_headers)
            .field("resolve_read_retries", &self.resolve_read_retries)
            .finish()
    }
}
