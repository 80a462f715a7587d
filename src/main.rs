//! RPS Arena Server
//!
//! Serves the arena over WebSocket. Configuration comes from the
//! environment; `RUST_LOG` controls log output.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rps_arena::{
    TICK_RATE, VERSION,
    agent::BotFactory,
    game::level::ArenaLevel,
    network::{AuthConfig, GameServer, ManagerConfig, ServerConfig, SessionManager},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("RPS Arena Server v{}", VERSION);

    let server_config = ServerConfig::from_env();
    let manager_config = ManagerConfig::from_env();
    manager_config
        .session
        .validate()
        .context("invalid session configuration")?;

    info!(
        "Tick Rate: {} Hz (default {}), checkpoint every {} ticks, up to {} players",
        manager_config.session.tick_rate,
        TICK_RATE,
        manager_config.session.simulation.max_ticks_between_checkpoints,
        manager_config.session.max_players,
    );

    let sessions = Arc::new(SessionManager::new(
        manager_config,
        Arc::new(ArenaLevel::default()),
        Arc::new(BotFactory),
    ));
    let server = Arc::new(GameServer::new(server_config, AuthConfig::from_env(), sessions));

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}
