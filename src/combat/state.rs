//! Combat state machine
//!
//! A [`CombatSession`] is one character's fight against an enemy roster.
//! It moves between `PLAYER_TURN`, `AWAITING_DAMAGE_ROLL` and `ENEMY_TURN`
//! until every enemy is down, the player drops, or the player flees; then it
//! rests in `COMBAT_ENDED`.
//!
//! Enemy activations never wait for input: whenever control leaves the
//! player, enemies act in turn order until it comes back.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::attack::{
    apply_damage, damage_dice, resolve_attack, roll_to_hit, AttackOptions, AttackResult, ToHit,
};
use super::combatant::{Combatant, PLAYER_ID};
use super::dice::{Advantage, DieRoller};
use super::economy::ActionEconomy;
use super::error::{CombatError, CombatResult};
use super::initiative::{build_turn_order, rebuild_turn_order, roll_initiative, TurnEntry};

/// Where a session is in its round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PlayerTurn,
    AwaitingDamageRoll,
    EnemyTurn,
    CombatEnded,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PlayerTurn => "PLAYER_TURN",
            Phase::AwaitingDamageRoll => "AWAITING_DAMAGE_ROLL",
            Phase::EnemyTurn => "ENEMY_TURN",
            Phase::CombatEnded => "COMBAT_ENDED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget each activation starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatRules {
    pub action_max: u32,
    pub bonus_action_max: u32,
}

impl Default for CombatRules {
    fn default() -> Self {
        Self {
            action_max: 1,
            bonus_action_max: 1,
        }
    }
}

/// Something the player asks to do on their turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerAction {
    /// Standard-action weapon attack
    Attack {
        target_id: String,
        #[serde(default)]
        advantage: Advantage,
        /// Stop after a hit and wait for a separate damage roll
        #[serde(default)]
        defer_damage: bool,
    },
    /// Off-hand strike using the bonus action; no flat damage bonus
    BonusAttack {
        target_id: String,
        #[serde(default)]
        advantage: Advantage,
    },
    /// Damage for a hit made with `defer_damage`. Faces are rolled server-side
    /// when `rolls` is omitted.
    DamageRoll {
        #[serde(default)]
        rolls: Option<Vec<u32>>,
    },
    EndTurn,
    Flee,
}

impl PlayerAction {
    /// Payload shape name, matched against a token's expected shape
    pub fn dto_name(&self) -> &'static str {
        match self {
            PlayerAction::Attack { .. } => "attack",
            PlayerAction::BonusAttack { .. } => "bonus_attack",
            PlayerAction::DamageRoll { .. } => "damage_roll",
            PlayerAction::EndTurn => "end_turn",
            PlayerAction::Flee => "flee",
        }
    }
}

/// Which budget paid for a strike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrikeKind {
    Attack,
    BonusAttack,
}

/// One line of the attack log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackLogEntry {
    pub round: u32,
    pub kind: StrikeKind,
    #[serde(flatten)]
    pub result: AttackResult,
}

/// A hit waiting for its damage roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAttack {
    /// Token that made the hit; only it may submit the damage
    pub action_token: String,
    pub target_id: String,
    pub to_hit: ToHit,
}

/// Final tally handed back to character storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatSummary {
    pub victory: bool,
    pub defeat: bool,
    pub xp_gained: i64,
    pub enemies_defeated: Vec<String>,
    pub player_hp: i32,
}

/// One character's combat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatSession {
    pub character_id: String,
    pub in_combat: bool,
    pub player: Combatant,
    pub enemies: Vec<Combatant>,
    pub turn_order: Vec<TurnEntry>,
    pub current_turn_index: usize,
    pub round_number: u32,
    pub phase: Phase,
    #[serde(flatten)]
    pub economy: ActionEconomy,
    #[serde(default)]
    pub victory: bool,
    #[serde(default)]
    pub defeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_attack: Option<PendingAttack>,
}

impl CombatSession {
    /// Roll initiative and run enemy activations until the player is up.
    ///
    /// Initiative is rolled for enemies in roster order, then the player.
    /// The log holds any attacks enemies made before the player's first turn.
    pub fn start<R: DieRoller + ?Sized>(
        character_id: &str,
        mut player: Combatant,
        mut enemies: Vec<Combatant>,
        rules: CombatRules,
        roller: &mut R,
    ) -> CombatResult<(Self, Vec<AttackLogEntry>)> {
        if enemies.is_empty() {
            return Err(CombatError::invalid_request("enemy roster is empty"));
        }
        if !player.is_alive() {
            return Err(CombatError::invalid_state(
                "character has no hit points left",
            ));
        }

        player.id = PLAYER_ID.to_string();
        roll_initiative(&mut player, &mut enemies, roller);
        let turn_order = build_turn_order(&player, &enemies);

        let mut session = Self {
            character_id: character_id.to_string(),
            in_combat: true,
            player,
            enemies,
            turn_order,
            current_turn_index: 0,
            round_number: 1,
            phase: Phase::EnemyTurn,
            economy: ActionEconomy::new(rules.action_max, rules.bonus_action_max),
            victory: false,
            defeat: false,
            pending_attack: None,
        };

        let mut log = Vec::new();
        session.run_until_player(roller, &mut log)?;
        Ok((session, log))
    }

    /// Apply one player action, returning every attack it caused
    pub fn submit<R: DieRoller + ?Sized>(
        &mut self,
        action: &PlayerAction,
        action_token: &str,
        roller: &mut R,
    ) -> CombatResult<Vec<AttackLogEntry>> {
        self.ensure_active()?;
        let mut log = Vec::new();

        match action {
            PlayerAction::Attack {
                target_id,
                advantage,
                defer_damage,
            } => {
                self.ensure_phase(Phase::PlayerTurn)?;
                let idx = self.target_index(target_id)?;
                damage_dice(&self.player)?;
                if !self.economy.consume_action() {
                    return Err(CombatError::ActionEconomyExhausted("action"));
                }

                if *defer_damage {
                    let to_hit = roll_to_hit(&self.player, &self.enemies[idx], roller, *advantage);
                    if to_hit.hit {
                        self.pending_attack = Some(PendingAttack {
                            action_token: action_token.to_string(),
                            target_id: target_id.clone(),
                            to_hit,
                        });
                        self.phase = Phase::AwaitingDamageRoll;
                        return Ok(log);
                    }
                    let result = apply_damage(&self.player, &mut self.enemies[idx], to_hit, None);
                    self.record(StrikeKind::Attack, result, &mut log);
                } else {
                    let options = AttackOptions {
                        advantage: *advantage,
                        include_damage_bonus: true,
                    };
                    let result =
                        resolve_attack(&self.player, &mut self.enemies[idx], roller, options)?;
                    self.record(StrikeKind::Attack, result, &mut log);
                }
                self.after_player_strike(roller, &mut log)?;
            }

            PlayerAction::BonusAttack {
                target_id,
                advantage,
            } => {
                self.ensure_phase(Phase::PlayerTurn)?;
                let idx = self.target_index(target_id)?;
                damage_dice(&self.player)?;
                if !self.economy.consume_bonus_action() {
                    return Err(CombatError::ActionEconomyExhausted("bonus action"));
                }

                let options = AttackOptions {
                    advantage: *advantage,
                    include_damage_bonus: false,
                };
                let result = resolve_attack(&self.player, &mut self.enemies[idx], roller, options)?;
                self.record(StrikeKind::BonusAttack, result, &mut log);
                self.after_player_strike(roller, &mut log)?;
            }

            PlayerAction::DamageRoll { rolls } => {
                self.ensure_phase(Phase::AwaitingDamageRoll)?;
                let pending = self
                    .pending_attack
                    .clone()
                    .ok_or_else(|| CombatError::invalid_state("no attack is awaiting damage"))?;
                if pending.action_token != action_token {
                    return Err(CombatError::invalid_request(format!(
                        "damage roll belongs to action token '{}'",
                        pending.action_token
                    )));
                }

                let idx = self.target_index(&pending.target_id)?;
                let dice = damage_dice(&self.player)?;
                let critical = pending.to_hit.critical;
                let bonus = self.player.damage_bonus;
                let damage = match rolls {
                    Some(faces) => dice
                        .from_faces(faces, critical, bonus)
                        .map_err(|e| CombatError::invalid_request(e.to_string()))?,
                    None => dice.roll_damage(roller, critical, bonus),
                };

                self.pending_attack = None;
                self.phase = Phase::PlayerTurn;
                let result =
                    apply_damage(&self.player, &mut self.enemies[idx], pending.to_hit, Some(damage));
                self.record(StrikeKind::Attack, result, &mut log);
                self.after_player_strike(roller, &mut log)?;
            }

            PlayerAction::EndTurn => {
                self.ensure_phase(Phase::PlayerTurn)?;
                self.end_player_turn(roller, &mut log)?;
            }

            PlayerAction::Flee => {
                self.flee();
            }
        }

        Ok(log)
    }

    /// Leave combat without a victory or defeat
    pub fn flee(&mut self) {
        self.in_combat = false;
        self.phase = Phase::CombatEnded;
        self.pending_attack = None;
    }

    /// Ids of enemies that can still be targeted
    pub fn valid_targets(&self) -> Vec<String> {
        self.enemies
            .iter()
            .filter(|e| e.is_alive())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Combatant whose activation it is
    pub fn active_turn(&self) -> Option<&TurnEntry> {
        self.turn_order.get(self.current_turn_index)
    }

    pub fn is_over(&self) -> bool {
        self.phase == Phase::CombatEnded
    }

    /// Outcome tally; XP is only awarded for a victory
    pub fn summary(&self, xp_per_enemy_hp: i64) -> CombatSummary {
        let defeated: Vec<&Combatant> = self.enemies.iter().filter(|e| !e.is_alive()).collect();
        let xp_gained = if self.victory {
            defeated.iter().map(|e| e.hp_max as i64).sum::<i64>() * xp_per_enemy_hp
        } else {
            0
        };

        CombatSummary {
            victory: self.victory,
            defeat: self.defeat,
            xp_gained,
            enemies_defeated: defeated.iter().map(|e| e.name.clone()).collect(),
            player_hp: self.player.hp,
        }
    }

    fn ensure_active(&self) -> CombatResult<()> {
        if !self.in_combat || self.phase == Phase::CombatEnded {
            return Err(CombatError::invalid_state("combat has ended"));
        }
        Ok(())
    }

    fn ensure_phase(&self, expected: Phase) -> CombatResult<()> {
        if self.phase != expected {
            return Err(CombatError::invalid_state(format!(
                "expected {}, session is in {}",
                expected, self.phase
            )));
        }
        Ok(())
    }

    fn target_index(&self, target_id: &str) -> CombatResult<usize> {
        self.enemies
            .iter()
            .position(|e| e.id == target_id && e.is_alive())
            .ok_or_else(|| CombatError::InvalidTarget {
                target_id: target_id.to_string(),
                valid_targets: self.valid_targets(),
            })
    }

    /// Log a strike, then prune the dead and check for the end of combat
    fn record(&mut self, kind: StrikeKind, result: AttackResult, log: &mut Vec<AttackLogEntry>) {
        let defeated = result.target_defeated;
        log.push(AttackLogEntry {
            round: self.round_number,
            kind,
            result,
        });

        if defeated {
            let active = self.active_turn().map(|e| e.id.clone());
            let (order, index) = rebuild_turn_order(
                &self.player,
                &self.enemies,
                self.current_turn_index,
                active.as_deref(),
            );
            self.turn_order = order;
            self.current_turn_index = index;
        }
        self.check_termination();
    }

    fn check_termination(&mut self) {
        if !self.player.is_alive() {
            self.defeat = true;
        } else if self.enemies.iter().all(|e| !e.is_alive()) {
            self.victory = true;
        } else {
            return;
        }
        self.in_combat = false;
        self.phase = Phase::CombatEnded;
        self.pending_attack = None;
    }

    fn after_player_strike<R: DieRoller + ?Sized>(
        &mut self,
        roller: &mut R,
        log: &mut Vec<AttackLogEntry>,
    ) -> CombatResult<()> {
        if self.is_over() || !self.economy.is_exhausted() {
            return Ok(());
        }
        self.end_player_turn(roller, log)
    }

    fn end_player_turn<R: DieRoller + ?Sized>(
        &mut self,
        roller: &mut R,
        log: &mut Vec<AttackLogEntry>,
    ) -> CombatResult<()> {
        self.advance_turn();
        self.run_until_player(roller, log)
    }

    /// Move the pointer on, wrapping into a new round
    fn advance_turn(&mut self) {
        self.current_turn_index += 1;
        if self.current_turn_index >= self.turn_order.len() {
            self.round_number += 1;
            self.turn_order = build_turn_order(&self.player, &self.enemies);
            self.current_turn_index = 0;
        }
        self.economy.reset_for_activation();
    }

    fn run_until_player<R: DieRoller + ?Sized>(
        &mut self,
        roller: &mut R,
        log: &mut Vec<AttackLogEntry>,
    ) -> CombatResult<()> {
        loop {
            if self.is_over() {
                return Ok(());
            }
            let entry = self
                .active_turn()
                .cloned()
                .ok_or_else(|| CombatError::invalid_state("turn order is empty"))?;

            if entry.is_player {
                self.phase = Phase::PlayerTurn;
                return Ok(());
            }

            self.phase = Phase::EnemyTurn;
            let attacker = self
                .enemies
                .iter()
                .position(|e| e.id == entry.id && e.is_alive());
            if let Some(idx) = attacker {
                if self.economy.consume_action() {
                    let result = resolve_attack(
                        &self.enemies[idx],
                        &mut self.player,
                        roller,
                        AttackOptions::default(),
                    )?;
                    self.record(StrikeKind::Attack, result, log);
                }
            }

            if self.is_over() {
                return Ok(());
            }
            self.advance_turn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::combatant::fixtures::{enemy, player};
    use crate::combat::dice::ScriptedRoller;

    fn attack(target: &str) -> PlayerAction {
        PlayerAction::Attack {
            target_id: target.to_string(),
            advantage: Advantage::Normal,
            defer_damage: false,
        }
    }

    fn deferred(target: &str) -> PlayerAction {
        PlayerAction::Attack {
            target_id: target.to_string(),
            advantage: Advantage::Normal,
            defer_damage: true,
        }
    }

    /// Player (20 hp, AC 10, +5, 1d6+2) against one goblin (7 hp, AC 13)
    fn duel(faces: &[u32]) -> (CombatSession, Vec<AttackLogEntry>, ScriptedRoller) {
        let mut roller = ScriptedRoller::new(faces.iter().copied());
        let (session, log) = CombatSession::start(
            "char-1",
            player(20),
            vec![enemy(1, "Goblin", 7, 13)],
            CombatRules::default(),
            &mut roller,
        )
        .unwrap();
        (session, log, roller)
    }

    #[test]
    fn test_player_first_waits_for_input() {
        let (session, log, _) = duel(&[5, 15]);
        assert!(log.is_empty());
        assert_eq!(session.phase, Phase::PlayerTurn);
        assert_eq!(session.round_number, 1);
        assert_eq!(session.current_turn_index, 0);
        assert_eq!(session.active_turn().unwrap().id, "player");
        assert_eq!(session.economy.action_remaining, 1);
        assert_eq!(session.economy.bonus_action_remaining, 1);
    }

    #[test]
    fn test_enemy_first_acts_immediately() {
        // goblin 18 init, player 3; goblin hits 15+3 vs AC 10 for 4+1
        let (session, log, _) = duel(&[18, 3, 15, 4]);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].result.attacker_id, "enemy-1");
        assert_eq!(log[0].result.target_id, "player");
        assert_eq!(log[0].result.total_damage, 5);
        assert_eq!(session.player.hp, 15);
        assert_eq!(session.phase, Phase::PlayerTurn);
        assert_eq!(session.current_turn_index, 1);
        assert_eq!(session.round_number, 1);
    }

    #[test]
    fn test_tied_enemies_act_before_player() {
        let mut roller = ScriptedRoller::new([15, 15, 15, 1, 1]);
        let (session, log) = CombatSession::start(
            "char-1",
            player(20),
            vec![enemy(1, "Goblin", 7, 13), enemy(2, "Wolf", 11, 13)],
            CombatRules::default(),
            &mut roller,
        )
        .unwrap();

        let order: Vec<&str> = session.turn_order.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["enemy-1", "enemy-2", "player"]);
        let attackers: Vec<&str> = log.iter().map(|e| e.result.attacker_id.as_str()).collect();
        assert_eq!(attackers, vec!["enemy-1", "enemy-2"]);
        assert!(log.iter().all(|e| e.result.to_hit.fumble));
        assert_eq!(session.phase, Phase::PlayerTurn);
        assert_eq!(session.current_turn_index, 2);
    }

    #[test]
    fn test_kill_last_enemy_is_victory() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        roller.push([20, 6, 6]);

        let log = session.submit(&attack("enemy-1"), "tok-1", &mut roller).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].result.to_hit.critical);
        assert!(log[0].result.target_defeated);
        assert!(session.victory);
        assert!(!session.defeat);
        assert!(!session.in_combat);
        assert_eq!(session.phase, Phase::CombatEnded);

        let err = session.submit(&attack("enemy-1"), "tok-2", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::InvalidCombatState(_)));

        let summary = session.summary(10);
        assert_eq!(summary.xp_gained, 70);
        assert_eq!(summary.enemies_defeated, vec!["Goblin".to_string()]);
    }

    #[test]
    fn test_action_economy_and_round_wrap() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        roller.push([2]);

        // 2 + 5 misses AC 13; bonus action still open so the turn stays
        let log = session.submit(&attack("enemy-1"), "tok-1", &mut roller).unwrap();
        assert_eq!(log[0].result.total_damage, 0);
        assert_eq!(session.phase, Phase::PlayerTurn);
        assert_eq!(session.economy.action_remaining, 0);

        let err = session.submit(&attack("enemy-1"), "tok-2", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::ActionEconomyExhausted("action")));

        // goblin hits 10+3 vs AC 10 for 3+1
        roller.push([10, 3]);
        let log = session.submit(&PlayerAction::EndTurn, "tok-3", &mut roller).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].result.attacker_id, "enemy-1");
        assert_eq!(session.player.hp, 16);
        assert_eq!(session.round_number, 2);
        assert_eq!(session.current_turn_index, 0);
        assert_eq!(session.phase, Phase::PlayerTurn);
        assert_eq!(session.economy.action_remaining, 1);
        assert_eq!(session.economy.bonus_action_remaining, 1);
    }

    #[test]
    fn test_exhausted_economy_advances_turn() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        roller.push([2]);
        session.submit(&attack("enemy-1"), "tok-1", &mut roller).unwrap();

        roller.push([2, 1]);
        let bonus = PlayerAction::BonusAttack {
            target_id: "enemy-1".to_string(),
            advantage: Advantage::Normal,
        };
        let log = session.submit(&bonus, "tok-2", &mut roller).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].kind, StrikeKind::BonusAttack);
        assert_eq!(log[1].result.attacker_id, "enemy-1");
        assert!(log[1].result.to_hit.fumble);
        assert_eq!(session.round_number, 2);
        assert_eq!(session.phase, Phase::PlayerTurn);

        assert_eq!(session.economy.action_remaining, 1);
        assert_eq!(session.economy.bonus_action_remaining, 1);

        session.economy.bonus_action_remaining = 0;
        let err = session.submit(&bonus, "tok-3", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::ActionEconomyExhausted("bonus action")));
    }

    #[test]
    fn test_invalid_target_reports_valid_ids() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        let err = session.submit(&attack("enemy-9"), "tok-1", &mut roller).unwrap_err();
        match err {
            CombatError::InvalidTarget {
                target_id,
                valid_targets,
            } => {
                assert_eq!(target_id, "enemy-9");
                assert_eq!(valid_targets, vec!["enemy-1".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // rejected request spent nothing
        assert_eq!(session.economy.action_remaining, 1);
    }

    #[test]
    fn test_dead_enemy_is_not_a_target() {
        let mut roller = ScriptedRoller::new([5, 4, 15]);
        let (mut session, _) = CombatSession::start(
            "char-1",
            player(20),
            vec![enemy(1, "Goblin", 7, 13), enemy(2, "Wolf", 11, 13)],
            CombatRules::default(),
            &mut roller,
        )
        .unwrap();

        roller.push([20, 6, 6]);
        session.submit(&attack("enemy-1"), "tok-1", &mut roller).unwrap();
        assert!(!session.is_over());
        assert_eq!(session.turn_order.len(), 2);

        let bonus = PlayerAction::BonusAttack {
            target_id: "enemy-1".to_string(),
            advantage: Advantage::Normal,
        };
        let err = session.submit(&bonus, "tok-2", &mut roller).unwrap_err();
        assert!(matches!(
            err,
            CombatError::InvalidTarget { ref valid_targets, .. } if valid_targets == &vec!["enemy-2".to_string()]
        ));
    }

    #[test]
    fn test_kill_mid_round_keeps_pointer_on_player() {
        // goblin 18, wolf 5, player 10 => goblin, player, wolf
        let mut roller = ScriptedRoller::new([18, 5, 10, 1]);
        let (mut session, log) = CombatSession::start(
            "char-1",
            player(20),
            vec![enemy(1, "Goblin", 7, 13), enemy(2, "Wolf", 11, 13)],
            CombatRules::default(),
            &mut roller,
        )
        .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(session.current_turn_index, 1);

        roller.push([20, 6, 6]);
        session.submit(&attack("enemy-1"), "tok-1", &mut roller).unwrap();
        let order: Vec<&str> = session.turn_order.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["player", "enemy-2"]);
        assert_eq!(session.active_turn().unwrap().id, "player");

        // wolf still acts this round before the wrap
        roller.push([1]);
        let log = session.submit(&PlayerAction::EndTurn, "tok-2", &mut roller).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].result.attacker_id, "enemy-2");
        assert_eq!(log[0].round, 1);
        assert_eq!(session.round_number, 2);
        assert_eq!(session.active_turn().unwrap().id, "player");
    }

    #[test]
    fn test_player_defeat_ends_combat() {
        let mut roller = ScriptedRoller::new([18, 3, 15, 6]);
        let (mut session, log) = CombatSession::start(
            "char-1",
            player(3),
            vec![enemy(1, "Goblin", 7, 13)],
            CombatRules::default(),
            &mut roller,
        )
        .unwrap();

        assert_eq!(log[0].result.target_hp_after, 0);
        assert!(log[0].result.target_defeated);
        assert_eq!(session.player.hp, 0);
        assert!(session.defeat);
        assert!(!session.victory);
        assert_eq!(session.phase, Phase::CombatEnded);

        let err = session.submit(&attack("enemy-1"), "tok-1", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::InvalidCombatState(_)));
        assert_eq!(session.summary(10).xp_gained, 0);
    }

    #[test]
    fn test_deferred_damage_flow() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        roller.push([20]);

        let log = session.submit(&deferred("enemy-1"), "tok-1", &mut roller).unwrap();
        assert!(log.is_empty());
        assert_eq!(session.phase, Phase::AwaitingDamageRoll);
        let pending = session.pending_attack.clone().unwrap();
        assert!(pending.to_hit.critical);
        assert_eq!(pending.action_token, "tok-1");

        let err = session.submit(&attack("enemy-1"), "tok-1", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::InvalidCombatState(_)));

        let damage = PlayerAction::DamageRoll {
            rolls: Some(vec![3, 4]),
        };
        let err = session.submit(&damage, "tok-other", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::InvalidRequest(_)));

        // critical: two faces required
        let short = PlayerAction::DamageRoll {
            rolls: Some(vec![3]),
        };
        let err = session.submit(&short, "tok-1", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::InvalidRequest(_)));
        assert_eq!(session.phase, Phase::AwaitingDamageRoll);

        let log = session.submit(&damage, "tok-1", &mut roller).unwrap();
        assert_eq!(log[0].result.total_damage, 3 + 4 + 2);
        assert!(session.victory);
        assert!(session.pending_attack.is_none());
    }

    #[test]
    fn test_deferred_miss_resolves_immediately() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        roller.push([1]);
        let log = session.submit(&deferred("enemy-1"), "tok-1", &mut roller).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].result.to_hit.fumble);
        assert_eq!(session.phase, Phase::PlayerTurn);
        assert!(session.pending_attack.is_none());
    }

    #[test]
    fn test_damage_roll_outside_deferral() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        let err = session
            .submit(&PlayerAction::DamageRoll { rolls: None }, "tok-1", &mut roller)
            .unwrap_err();
        assert!(matches!(err, CombatError::InvalidCombatState(_)));
    }

    #[test]
    fn test_flee() {
        let (mut session, _, mut roller) = duel(&[5, 15]);
        session.submit(&PlayerAction::Flee, "tok-1", &mut roller).unwrap();
        assert!(!session.in_combat);
        assert_eq!(session.phase, Phase::CombatEnded);
        assert!(!session.victory && !session.defeat);

        let err = session.submit(&PlayerAction::EndTurn, "tok-2", &mut roller).unwrap_err();
        assert!(matches!(err, CombatError::InvalidCombatState(_)));
    }

    #[test]
    fn test_start_rejects_bad_input() {
        let mut roller = ScriptedRoller::default();
        let err = CombatSession::start("c", player(20), vec![], CombatRules::default(), &mut roller)
            .unwrap_err();
        assert!(matches!(err, CombatError::InvalidRequest(_)));

        let err = CombatSession::start(
            "c",
            player(0),
            vec![enemy(1, "Goblin", 7, 13)],
            CombatRules::default(),
            &mut roller,
        )
        .unwrap_err();
        assert!(matches!(err, CombatError::InvalidCombatState(_)));
    }

    #[test]
    fn test_session_serializes_phase_and_economy() {
        let (session, _, _) = duel(&[5, 15]);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["phase"], "PLAYER_TURN");
        assert_eq!(json["action_remaining"], 1);
        assert_eq!(json["bonus_action_max"], 1);
        assert_eq!(json["turn_order"][0]["is_player"], true);

        let back: CombatSession = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }
}
