//! Card Battle Server
//!
//! Serves the session directory over HTTP and battles over WebSocket.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cardbattle::{
    network::{authenticator_from_config, router, AuthConfig, DirectoryApi},
    Gateway, GameServer, ServerConfig, SessionRegistry, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    let auth_config = AuthConfig::from_env();
    if !auth_config.is_configured() {
        info!("No JWT key configured, bearer tokens are taken as user ids");
    }
    let authenticator = authenticator_from_config(auth_config);

    info!("Card Battle Server v{}", VERSION);
    info!(
        starting_health = config.battle.starting_health,
        mana_cap = config.battle.mana_cap,
        require_auth = config.require_auth,
        "Battle settings"
    );

    let registry = Arc::new(SessionRegistry::new(config.battle.clone()));
    let gateway = Arc::new(Gateway::new(registry.clone()));

    // Session directory
    let api = Arc::new(DirectoryApi::new(registry, authenticator.clone()));
    let http_listener = TcpListener::bind(config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_addr))?;
    info!("Session directory listening on {}", config.http_bind_addr);
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, router(api)).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Battle connections
    let server = Arc::new(GameServer::new(config, gateway, authenticator));
    let running = server.clone();
    let ws_handle = tokio::spawn(async move { running.run().await });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Shutting down");
    server.shutdown();

    ws_handle.await.context("websocket task panicked")??;
    http_handle.abort();

    Ok(())
}
