//! Common test utilities - CombatdTest harness for end-to-end testing

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use combatd::{Config, Server};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Test harness that runs a real combatd server on a random port
pub struct CombatdTest {
    pub addr: SocketAddr,
    pub client: Client,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl CombatdTest {
    /// Start a server with seeded dice and an in-memory database
    pub async fn start() -> Result<Self> {
        let mut config = Config::default();
        config.combat.rng_seed = Some(7);
        Self::start_with(config).await
    }

    pub async fn start_with(mut config: Config) -> Result<Self> {
        // Bind first so the port cannot be taken between lookup and serve
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        config.server.bind_addr = addr;

        let server = Arc::new(Server::new(config).await?);
        let server_clone = server.clone();

        // Spawn the server in a background task
        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.serve(listener).await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        Ok(Self {
            addr,
            client,
            server,
            _handle: handle,
        })
    }

    /// Get the base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await?)
    }

    /// Get direct access to the database for test setup/assertions
    pub fn db(&self) -> Arc<combatd::db::Database> {
        self.server.db()
    }

    /// Shutdown the server gracefully
    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    /// Ask the server for a fresh action token
    pub async fn token(&self) -> Result<String> {
        let body: Value = self.post("/actions/token", &json!({})).await?.json().await?;
        body["action_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("no action_token in {}", body))
    }

    /// Create a character with sturdy defaults and return its id
    pub async fn create_character(&self, id: &str, hp_max: i32) -> Result<String> {
        let resp = self
            .post(
                "/characters",
                &json!({
                    "id": id,
                    "name": id,
                    "hp_max": hp_max,
                    "armor_class": 14,
                    "attack_bonus": 5,
                    "damage_dice": "1d8",
                    "damage_bonus": 3
                }),
            )
            .await?;
        anyhow::ensure!(resp.status() == 201, "create failed: {}", resp.status());
        Ok(id.to_string())
    }
}

impl Drop for CombatdTest {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
