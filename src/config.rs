//! Server configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `COMBATD_`-prefixed environment variables (`__` separates sections, e.g.
//! `COMBATD_LEDGER__TOKEN_TTL_SECS=120`).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::combat::{check_stat, parse_dice, CombatRules, EnemyDefaults};

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "COMBATD_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub combat: CombatConfig,
}

/// Listener and storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// SQLite file; in-memory when unset
    pub db_path: Option<String>,
}

/// Action-token lifetimes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How long an unresolved token stays valid
    pub token_ttl_secs: u64,
    /// How long an applied result stays replayable
    pub applied_retention_secs: u64,
    /// Interval of the background cleanup pass
    pub sweep_interval_secs: u64,
}

/// Rules knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub action_max: u32,
    pub bonus_action_max: u32,
    /// XP per point of max hp of each defeated enemy
    pub xp_per_enemy_hp: i64,
    /// Fixed seed for reproducible dice
    pub rng_seed: Option<u64>,
    pub enemy_defaults: EnemyDefaults,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: None, // None = in-memory
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 300,
            applied_retention_secs: 86_400,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            action_max: 1,
            bonus_action_max: 1,
            xp_per_enemy_hp: 10,
            rng_seed: None,
            enemy_defaults: EnemyDefaults::default(),
        }
    }
}

impl LedgerConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn applied_retention(&self) -> Duration {
        Duration::from_secs(self.applied_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl CombatConfig {
    pub fn rules(&self) -> CombatRules {
        CombatRules {
            action_max: self.action_max,
            bonus_action_max: self.bonus_action_max,
        }
    }
}

impl Config {
    /// Provider chain, lowest precedence first
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
        }
        let config: Config = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.combat.action_max == 0 {
            bail!("combat.action_max must be at least 1");
        }
        if self.combat.xp_per_enemy_hp < 0 {
            bail!("combat.xp_per_enemy_hp must not be negative");
        }
        if self.ledger.token_ttl_secs == 0 {
            bail!("ledger.token_ttl_secs must be at least 1");
        }
        if self.ledger.sweep_interval_secs == 0 {
            bail!("ledger.sweep_interval_secs must be at least 1");
        }
        parse_dice(&self.combat.enemy_defaults.damage_dice)?;
        let defaults = &self.combat.enemy_defaults;
        check_stat("enemy_defaults", "attack_bonus", defaults.attack_bonus)?;
        check_stat("enemy_defaults", "damage_bonus", defaults.damage_bonus)?;
        Ok(())
    }
}
