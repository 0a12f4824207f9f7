//! Duck Sync Room Server
//!
//! Hosts multiplayer Duck Hunt rooms over WebSocket.
//! Configured from the environment; see `duck_sync::config`.

use tracing::info;
use tracing_subscriber::EnvFilter;

use duck_sync::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Duck Sync Server v{}", VERSION);

    let config = ServerConfig::from_env()?;
    info!(
        "Rooms: max {} players, {}s grace before eviction",
        config.registry.max_players,
        config.registry.grace_period.as_secs(),
    );

    let server = std::sync::Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
