//! uplinkd - real-time multiplayer typing race server.
//!
//! One process hosts the room registry, the WebSocket gateway, and a small
//! HTTP API for room creation and read-side queries.

mod auth;
mod config;
mod db;
mod error;
mod game;
mod http;
mod network;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::db::{SqliteStore, Storage};
use crate::game::manager::SessionManager;
use crate::network::Gateway;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting uplinkd");

    let db_path = config
        .database
        .as_ref()
        .map(|d| d.path.as_str())
        .unwrap_or(":memory:");
    let storage: Arc<dyn Storage> = Arc::new(SqliteStore::new(db_path).await?);

    let verifier = Arc::new(TokenVerifier::new(&config.auth.secret));

    let (manager, retire_rx) = SessionManager::new(Arc::clone(&storage), config.game.clone());
    tokio::spawn(Arc::clone(&manager).run_retirements(retire_rx));

    // HTTP API on its own task.
    let http_listener = tokio::net::TcpListener::bind(config.listen.http).await?;
    let api_state = Arc::new(http::ApiState {
        manager: Arc::clone(&manager),
        storage,
        verifier: Arc::clone(&verifier),
    });
    tokio::spawn(async move {
        if let Err(e) = http::serve(http_listener, api_state).await {
            error!(error = %e, "HTTP API server error");
        }
    });

    let gateway = Gateway::bind(
        config.listen.websocket,
        Arc::clone(&manager),
        verifier,
        config.listen.allow_origins.clone(),
    )
    .await?;

    tokio::select! {
        result = gateway.run() => {
            error!("gateway exited unexpectedly");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining rooms");
            manager.shutdown().await;
        }
    }

    info!("uplinkd stopped");
    Ok(())
}
