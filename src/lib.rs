//! combatd - tabletop RPG combat daemon
//!
//! A turn-based combat engine with idempotent, token-guarded actions, served
//! over HTTP and backed by SQLite.

pub mod api;
pub mod characters;
pub mod combat;
pub mod config;
pub mod db;
pub mod engine;
pub mod ledger;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use config::Config;
use db::Database;
use engine::CombatEngine;
use ledger::ActionLedger;

/// The combatd server instance
pub struct Server {
    config: Config,
    db: Arc<Database>,
    engine: Arc<CombatEngine>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server instance
    pub async fn new(config: Config) -> Result<Self> {
        let db = Database::new(config.server.db_path.as_deref()).await?;
        let engine = CombatEngine::new(db.pool().clone(), &config);
        Ok(Self::with_engine(config, db, engine))
    }

    /// Create a server around an existing engine
    pub fn with_engine(config: Config, db: Database, engine: CombatEngine) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            db: Arc::new(db),
            engine: Arc::new(engine),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Get the database handle
    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Get the combat engine
    pub fn engine(&self) -> Arc<CombatEngine> {
        self.engine.clone()
    }

    /// Build the router
    pub fn router(&self) -> Router {
        api::router(self.db.clone(), self.engine.clone())
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.server.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("combatd listening on {}", local_addr);

        let sweeper = self.spawn_ledger_sweep();
        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        sweeper.abort();
        info!("combatd shutdown complete");
        Ok(())
    }

    /// Periodically reclaim stuck and purge expired action tokens
    fn spawn_ledger_sweep(&self) -> JoinHandle<()> {
        let ledger: ActionLedger = self.engine.ledger().clone();
        let period = self.config.ledger.sweep_interval();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match ledger.sweep_expired().await {
                            Ok(report) => debug!(
                                "Ledger sweep done: {} reclaimed, {} purged",
                                report.reclaimed, report.purged
                            ),
                            Err(e) => warn!("Ledger sweep failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.server.bind_addr
    }
}
