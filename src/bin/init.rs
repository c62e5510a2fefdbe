//! combatd_init - One-time database initialization tool
//!
//! Creates a fresh combat database and optionally seeds character sheets.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use combatd::characters::{CharacterStore, NewCharacter};
use combatd::db::Database;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// combatd database initialization tool
#[derive(Parser, Debug)]
#[command(
    name = "combatd_init",
    version,
    about = "Initialize a new combatd database"
)]
struct Args {
    /// Path to SQLite database file to create (must not exist)
    #[arg(short, long)]
    database: PathBuf,

    /// JSON file holding an array of characters to create
    #[arg(long)]
    characters: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "combatd=info,combatd_init=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.database.exists() {
        bail!("Database already exists: {}", args.database.display());
    }

    // Parse the seed file before touching the filesystem
    let seed: Vec<NewCharacter> = match &args.characters {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid character file {}", path.display()))?
        }
        None => Vec::new(),
    };

    let path = args
        .database
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid database path: {}", args.database.display()))?;
    let db = Database::new(Some(path)).await?;
    info!("Created database {}", args.database.display());

    let store = CharacterStore::new(db.pool().clone());
    for new in seed {
        let sheet = store.create(new).await?;
        info!("Seeded character {} ({})", sheet.name, sheet.id);
    }

    Ok(())
}
