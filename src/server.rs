//! HTTP server bootstrap.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::Config;
use crate::llm::anthropic::AnthropicClient;
use crate::sandbox::remote::RemoteSandboxProvider;
use crate::store::{DbHandle, MessageStore};
use crate::workflow::Orchestrator;

pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().with_state(state)
}

/// Wire up the store, model client, sandbox provider, and orchestrator,
/// then serve until interrupted.
pub async fn start_server(config: Config) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.state_dir).context("Failed to create state directory")?;

    let store = MessageStore::new(&config.db_path).context("Failed to initialize message store")?;
    let db = DbHandle::new(store);
    let model = Arc::new(AnthropicClient::new(&config.models));
    let sandbox = Arc::new(RemoteSandboxProvider::new(&config.sandbox));

    let dev_mode = config.dev_mode;
    let port = config.port;
    let orchestrator = Arc::new(Orchestrator::new(config, model, sandbox, db.clone()));
    let state = Arc::new(AppState { db, orchestrator });

    let mut app = build_router(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Loom listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Shutting down");
}
