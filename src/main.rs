//! combatd - tabletop RPG combat daemon

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use combatd::{Config, Server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Turn-based combat engine daemon
#[derive(Parser, Debug)]
#[command(name = "combatd", version, about = "Run the combat engine HTTP server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// SQLite database file (overrides config; in-memory when unset)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "combatd=info,tower_http=debug".into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(database) = args.database {
        config.server.db_path = Some(database.display().to_string());
    }

    match &config.server.db_path {
        Some(path) => info!("Using database {}", path),
        None => info!("Using in-memory database; state is lost on exit"),
    }

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
