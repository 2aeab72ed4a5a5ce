//! # cplane-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the control plane. Without
//! `DATABASE_URL` it runs against the in-memory store.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use cplane_api::auth::IdentityConfig;
use cplane_api::config::{AppConfig, LogFormat};
use cplane_api::AppState;
use cplane_engine::ControlPlane;
use cplane_store::PgStore;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    init_tracing(config.log_format);
    tracing::info!(?config, "starting control plane API");

    let metrics = if config.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing Prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    let control_plane = match config.database_url.as_deref() {
        Some(url) => {
            let store = Arc::new(
                PgStore::connect(url, config.db_max_connections)
                    .await
                    .context("connecting to PostgreSQL")?,
            );
            ControlPlane::new(store.clone(), store, config.engine())
        }
        None => {
            tracing::warn!("DATABASE_URL not set. Running in in-memory mode; state is lost on restart.");
            ControlPlane::in_memory(config.engine())
        }
    };

    let identity = IdentityConfig {
        trust_headers: config.trust_identity_headers,
    };
    let app = cplane_api::app(AppState::new(control_plane, metrics), identity);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Control plane API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}
