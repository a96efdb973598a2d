//! Bounty Registry Server
//!
//! Escrowed bounties with one-time winner claims

use std::path::PathBuf;
use std::sync::Arc;

use bounty_registry::{BountyRegistry, Config};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bounty-registry")]
#[command(version)]
#[command(about = "Bounty Registry - escrowed prizes with one-time claims", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "BOUNTY_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Host to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting Bounty Registry Server");

    let mut config = Config::load_from(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.database.path = Some(database);
    }

    let registry = Arc::new(BountyRegistry::from_config(&config)?);
    info!(
        "Registry ready ({} admins, {:?} winner policy)",
        config.registry.admins.len(),
        config.registry.winner_policy
    );

    bounty_registry::server::run_server(&config.server.host, config.server.port, registry).await?;

    Ok(())
}
