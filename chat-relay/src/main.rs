//! chat-relay binary entry point.
//!
//! Usage:
//! ```bash
//! chat-relay --config relay.toml
//! RUST_LOG=securechat_relay=debug chat-relay
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use securechat_relay::cleanup::spawn_cleanup_task;
use securechat_relay::config::Config;
use securechat_relay::http::{build_router, init_start_time};
use securechat_relay::server::ChatRelay;
use securechat_relay::storage::SqliteStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prekey store and signaling relay for SecureChat.
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "securechat_relay=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let bind_address = config.server.bind_address.clone();

    serve(config)
        .await
        .with_context(|| format!("relay on {bind_address} failed"))?;
    Ok(())
}

async fn serve(config: Config) -> securechat_relay::error::Result<()> {
    let storage = SqliteStorage::open(&config.storage).await?;

    let bind_address = config.server.bind_address.clone();
    let cleanup_config = config.cleanup.clone();
    let relay = Arc::new(ChatRelay::new(config, storage));

    init_start_time();
    let cleanup = spawn_cleanup_task(
        relay.storage_arc(),
        relay.rate_limits().clone(),
        cleanup_config,
    );

    let app = build_router(relay.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("chat-relay v{} listening on {}", env!("CARGO_PKG_VERSION"), bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    cleanup.abort();
    relay.storage().close().await;
    tracing::info!("Server stopped");
    Ok(())
}

fn load_config(path: &Path) -> securechat_relay::error::Result<Config> {
    let mut config = if path.exists() {
        Config::from_file(path)?
    } else {
        tracing::warn!("Config file {} not found, using defaults", path.display());
        Config::default()
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}
