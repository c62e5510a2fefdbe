//! Combatant snapshots
//!
//! A combatant is a frozen copy of the stats combat needs. The player
//! combatant is seeded from the character store; enemies come from a roster.

use serde::{Deserialize, Serialize};

use super::dice::MAX_MODIFIER;
use super::error::{CombatError, CombatResult};

/// Turn-order id of the player combatant
pub const PLAYER_ID: &str = "player";

/// Stable id for the n-th spawned enemy (1-indexed)
pub fn enemy_id(n: usize) -> String {
    format!("enemy-{}", n)
}

/// Largest magnitude accepted for armor class and flat bonuses
pub const MAX_STAT: i32 = MAX_MODIFIER;

/// Reject an armor class or bonus outside `-MAX_STAT..=MAX_STAT`
pub fn check_stat(owner: &str, stat: &str, value: i32) -> CombatResult<()> {
    if (-MAX_STAT..=MAX_STAT).contains(&value) {
        Ok(())
    } else {
        Err(CombatError::invalid_request(format!(
            "{} of '{}' must be between -{} and {}",
            stat, owner, MAX_STAT, MAX_STAT
        )))
    }
}

/// Combat stats for a single participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: String,
    pub name: String,
    /// Current hit points (never below 0)
    pub hp: i32,
    /// Maximum hit points
    pub hp_max: i32,
    pub armor_class: i32,
    /// Initiative rolled at combat start
    #[serde(default)]
    pub initiative: i32,
    pub attack_bonus: i32,
    /// Damage expression, e.g. "1d8+2"
    pub damage_dice: String,
    /// Flat damage added to every hit
    pub damage_bonus: i32,
}

impl Combatant {
    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    /// Apply damage clamped at 0, returning `(hp_before, hp_after)`
    pub fn take_damage(&mut self, amount: i32) -> (i32, i32) {
        let before = self.hp;
        self.hp = (self.hp - amount.max(0)).max(0);
        (before, self.hp)
    }
}
