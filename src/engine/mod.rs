//! Combat engine
//!
//! Ties the pieces together for callers: every mutating call first takes
//! ownership of its action token in the ledger, then loads the character's
//! session, applies the change to a copy, and commits the new session
//! together with the ledger update in one transaction. A token that was
//! already applied replays its cached response instead of running again.

mod sessions;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::characters::CharacterStore;
use crate::combat::{
    spawn_enemies, AttackLogEntry, CombatError, CombatResult, CombatSession, CombatSummary,
    DieRoller, EnemySpec, Phase, PlayerAction, RngRoller,
};
use crate::config::{CombatConfig, Config};
use crate::ledger::{Acquire, AcquireMeta, ActionLedger};

pub use sessions::SessionStore;

/// Payload shape name for starting combat
pub const START_DTO: &str = "combat_start";
/// Payload shape name for closing combat
pub const END_DTO: &str = "combat_end";

/// Session after an action plus the attacks it caused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub state: CombatSession,
    pub attack_log: Vec<AttackLogEntry>,
}

/// Result of a token-guarded call
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
    /// The action ran now
    Applied(T),
    /// The token was already applied; this is the cached response
    Replayed(Value),
}

impl<T> Submission<T> {
    pub fn is_replayed(&self) -> bool {
        matches!(self, Submission::Replayed(_))
    }
}

impl<T: Serialize> Submission<T> {
    /// Response body, identical for the original call and every replay
    pub fn into_json(self) -> CombatResult<Value> {
        match self {
            Submission::Applied(value) => Ok(serde_json::to_value(value)?),
            Submission::Replayed(body) => Ok(body),
        }
    }
}

impl<T: DeserializeOwned> Submission<T> {
    pub fn into_inner(self) -> CombatResult<T> {
        match self {
            Submission::Applied(value) => Ok(value),
            Submission::Replayed(body) => Ok(serde_json::from_value(body)?),
        }
    }
}

/// One async mutex per character, created on first use
#[derive(Debug, Default)]
struct CharacterLocks {
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CharacterLocks {
    async fn lock(&self, character_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(character_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Combat service over SQLite storage
pub struct CombatEngine {
    pool: SqlitePool,
    ledger: ActionLedger,
    sessions: SessionStore,
    characters: CharacterStore,
    roller: parking_lot::Mutex<Box<dyn DieRoller + Send>>,
    config: CombatConfig,
    locks: CharacterLocks,
}

impl CombatEngine {
    /// Build an engine; dice come from `combat.rng_seed` when set, else the OS
    pub fn new(pool: SqlitePool, config: &Config) -> Self {
        let roller: Box<dyn DieRoller + Send> = match config.combat.rng_seed {
            Some(seed) => {
                info!("Using seeded dice (seed {})", seed);
                Box::new(RngRoller::seeded(seed))
            }
            None => Box::new(RngRoller::from_os_rng()),
        };

        Self {
            ledger: ActionLedger::new(
                pool.clone(),
                config.ledger.token_ttl(),
                config.ledger.applied_retention(),
            ),
            sessions: SessionStore::new(pool.clone()),
            characters: CharacterStore::new(pool.clone()),
            pool,
            roller: parking_lot::Mutex::new(roller),
            config: config.combat.clone(),
            locks: CharacterLocks::default(),
        }
    }

    /// Replace the dice source
    pub fn with_roller(mut self, roller: impl DieRoller + Send + 'static) -> Self {
        self.roller = parking_lot::Mutex::new(Box::new(roller));
        self
    }

    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    pub fn characters(&self) -> &CharacterStore {
        &self.characters
    }

    /// Issue a fresh action token
    pub fn issue_token(&self) -> String {
        self.ledger.issue_token()
    }

    /// Start (or restart) combat for a character against a roster
    pub async fn start_combat(
        &self,
        character_id: &str,
        requester_id: &str,
        action_token: &str,
        roster: &[EnemySpec],
    ) -> CombatResult<Submission<ActionOutcome>> {
        let _guard = self.locks.lock(character_id).await;
        if let Some(replay) = self
            .acquire(character_id, requester_id, action_token, START_DTO)
            .await?
        {
            return Ok(Submission::Replayed(replay));
        }

        let result = async {
            let sheet = self.characters.require(character_id).await?;
            let enemies = spawn_enemies(roster, &self.config.enemy_defaults)?;

            if let Some(previous) = self.sessions.load(character_id).await? {
                if !previous.is_over() {
                    warn!("Replacing unfinished combat for {}", character_id);
                }
            }

            let (state, attack_log) = {
                let mut roller = self.roller.lock();
                CombatSession::start(
                    character_id,
                    sheet.to_combatant(),
                    enemies,
                    self.config.rules(),
                    &mut **roller,
                )?
            };

            let outcome = ActionOutcome { state, attack_log };
            let body = serde_json::to_value(&outcome)?;
            self.commit(action_token, &outcome.state, &body, None).await?;
            Ok::<_, CombatError>(outcome)
        }
        .await;

        let outcome = self.settle(action_token, result).await?;
        info!(
            "Combat started for {}: {} enemies, round {}, phase {}",
            character_id,
            outcome.state.enemies.len(),
            outcome.state.round_number,
            outcome.state.phase
        );
        Ok(Submission::Applied(outcome))
    }

    /// Apply one player action
    pub async fn submit_action(
        &self,
        character_id: &str,
        requester_id: &str,
        action_token: &str,
        action: &PlayerAction,
    ) -> CombatResult<Submission<ActionOutcome>> {
        let _guard = self.locks.lock(character_id).await;
        if let Some(replay) = self
            .acquire(character_id, requester_id, action_token, action.dto_name())
            .await?
        {
            return Ok(Submission::Replayed(replay));
        }

        let result = async {
            let mut state = self
                .sessions
                .load(character_id)
                .await?
                .ok_or_else(|| CombatError::invalid_state("character is not in combat"))?;

            let attack_log = {
                let mut roller = self.roller.lock();
                state.submit(action, action_token, &mut **roller)?
            };

            // a deferred hit keeps the token open for its damage roll
            let next_dto = (state.phase == Phase::AwaitingDamageRoll)
                .then(|| PlayerAction::DamageRoll { rolls: None }.dto_name());

            let outcome = ActionOutcome { state, attack_log };
            let body = serde_json::to_value(&outcome)?;
            self.commit(action_token, &outcome.state, &body, next_dto)
                .await?;
            Ok::<_, CombatError>(outcome)
        }
        .await;

        let outcome = self.settle(action_token, result).await?;
        debug!(
            "{} applied '{}' ({} attack(s)); phase {}",
            character_id,
            action.dto_name(),
            outcome.attack_log.len(),
            outcome.state.phase
        );
        if outcome.state.is_over() {
            info!(
                "Combat over for {}: victory={} defeat={}",
                character_id, outcome.state.victory, outcome.state.defeat
            );
        }
        Ok(Submission::Applied(outcome))
    }

    /// Current session for a character, if one exists
    pub async fn get_status(&self, character_id: &str) -> CombatResult<Option<CombatSession>> {
        self.sessions.load(character_id).await
    }

    /// Close a character's combat, writing hp and XP back to the character
    ///
    /// Accepted in any state; closing an unfinished fight is a retreat and
    /// awards no XP.
    pub async fn end_combat(
        &self,
        character_id: &str,
        requester_id: &str,
        action_token: &str,
    ) -> CombatResult<Submission<CombatSummary>> {
        let _guard = self.locks.lock(character_id).await;
        if let Some(replay) = self
            .acquire(character_id, requester_id, action_token, END_DTO)
            .await?
        {
            return Ok(Submission::Replayed(replay));
        }

        let result = async {
            let state = self
                .sessions
                .load(character_id)
                .await?
                .ok_or_else(|| CombatError::NotFound(format!("combat for '{}'", character_id)))?;

            let summary = state.summary(self.config.xp_per_enemy_hp);
            let body = serde_json::to_value(&summary)?;
            self.commit_end(action_token, character_id, &summary, &body)
                .await?;
            Ok::<_, CombatError>(summary)
        }
        .await;

        let summary = self.settle(action_token, result).await?;
        info!(
            "Combat closed for {}: victory={} xp_gained={} hp={}",
            character_id, summary.victory, summary.xp_gained, summary.player_hp
        );
        Ok(Submission::Applied(summary))
    }

    /// Take ownership of a token; `Some` carries the cached response of an
    /// already-applied token
    async fn acquire(
        &self,
        character_id: &str,
        requester_id: &str,
        action_token: &str,
        dto: &str,
    ) -> CombatResult<Option<Value>> {
        let meta = AcquireMeta {
            requester_id: requester_id.to_string(),
            combat_id: character_id.to_string(),
            dto: dto.to_string(),
        };

        match self.ledger.try_acquire(action_token, &meta).await? {
            Acquire::Acquired(_) => Ok(None),
            Acquire::Duplicate(body) => {
                info!("Replaying action {} for {}", action_token, character_id);
                Ok(Some(body))
            }
            Acquire::Parked(partial) => {
                info!(
                    "Replaying parked step of {} for {}",
                    action_token, character_id
                );
                Ok(Some(partial))
            }
            Acquire::Busy(record) => {
                warn!(
                    "Action {} for {} is already {}",
                    action_token,
                    character_id,
                    record.status.as_str()
                );
                Err(CombatError::ActionInProgress(action_token.to_string()))
            }
        }
    }

    /// Persist the session and the ledger transition atomically
    async fn commit(
        &self,
        action_token: &str,
        state: &CombatSession,
        body: &Value,
        next_dto: Option<&str>,
    ) -> CombatResult<()> {
        let mut tx = self.pool.begin().await?;
        self.sessions.save_on(&mut *tx, state).await?;
        match next_dto {
            Some(dto) => {
                self.ledger
                    .set_pending_with_expected_on(&mut *tx, action_token, dto, body)
                    .await?
            }
            None => self.ledger.set_applied_on(&mut *tx, action_token, body).await?,
        }
        tx.commit().await?;
        Ok(())
    }

    /// Character write-back, session removal and ledger flip in one transaction
    async fn commit_end(
        &self,
        action_token: &str,
        character_id: &str,
        summary: &CombatSummary,
        body: &Value,
    ) -> CombatResult<()> {
        let mut tx = self.pool.begin().await?;
        self.characters
            .apply_combat_outcome_on(&mut *tx, character_id, summary.player_hp, summary.xp_gained)
            .await?;
        self.sessions.delete_on(&mut *tx, character_id).await?;
        self.ledger.set_applied_on(&mut *tx, action_token, body).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Mark the token failed when the action did not commit
    async fn settle<T>(&self, action_token: &str, result: CombatResult<T>) -> CombatResult<T> {
        if let Err(e) = &result {
            debug!("Action {} rejected: {}", action_token, e);
            if let Err(mark) = self.ledger.set_failed(action_token, &e.to_string()).await {
                warn!("Could not mark action {} failed: {}", action_token, mark);
            }
        }
        result
    }
}
