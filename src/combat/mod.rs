//! Combat system module
//!
//! Implements D&D-style turn-based combat with:
//! - Dice rolling (e.g., "2d6+3") with advantage and critical dice
//! - Initiative and turn order
//! - Per-turn action economy
//! - Attack resolution with to-hit and damage
//! - The round state machine tying them together

mod attack;
mod combatant;
mod dice;
mod economy;
mod error;
mod initiative;
mod roster;
mod state;

pub use attack::{resolve_attack, roll_to_hit, apply_damage, AttackOptions, AttackResult, ToHit};
pub use combatant::{check_stat, enemy_id, Combatant, MAX_STAT, PLAYER_ID};
pub use dice::{
    is_critical, is_fumble, parse_dice, roll, Advantage, DiceError, DiceRoll, DieRoller,
    RngRoller, RollResult, ScriptedRoller, MAX_MODIFIER,
};
pub use economy::ActionEconomy;
pub use error::{CombatError, CombatResult};
pub use initiative::{build_turn_order, rebuild_turn_order, roll_initiative, TurnEntry};
pub use roster::{spawn_enemies, EnemyDefaults, EnemySpec, NarratorInstruction};
pub use state::{
    AttackLogEntry, CombatRules, CombatSession, CombatSummary, PendingAttack, Phase,
    PlayerAction, StrikeKind,
};
