//! Enemy rosters
//!
//! Enemies arrive either as a structured list or as a `combat_start`
//! instruction emitted by the narrator. Both normalize to [`EnemySpec`]s,
//! which spawn combatants with ids `enemy-1`, `enemy-2`, ... in list order.

use serde::{Deserialize, Serialize};

use super::combatant::{check_stat, enemy_id, Combatant};
use super::dice::parse_dice;
use super::error::{CombatError, CombatResult};

/// Stats filled in when a roster entry omits them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnemyDefaults {
    pub attack_bonus: i32,
    pub damage_dice: String,
    pub damage_bonus: i32,
}

impl Default for EnemyDefaults {
    fn default() -> Self {
        Self {
            attack_bonus: 3,
            damage_dice: "1d6".to_string(),
            damage_bonus: 1,
        }
    }
}

/// One enemy as described by a caller or the narrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemySpec {
    pub name: String,
    pub hp: i32,
    #[serde(alias = "armor_class")]
    pub ac: i32,
    #[serde(default)]
    pub attack_bonus: Option<i32>,
    #[serde(default)]
    pub damage_dice: Option<String>,
    #[serde(default)]
    pub damage_bonus: Option<i32>,
}

/// Structured instruction emitted by the narrative layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NarratorInstruction {
    CombatStart { enemies: Vec<EnemySpec> },
}

impl NarratorInstruction {
    /// Parse a raw instruction value
    pub fn from_value(value: serde_json::Value) -> CombatResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| CombatError::invalid_request(format!("unrecognized instruction: {}", e)))
    }

    /// Enemy roster carried by the instruction
    pub fn into_roster(self) -> Vec<EnemySpec> {
        match self {
            NarratorInstruction::CombatStart { enemies } => enemies,
        }
    }
}

/// Turn a roster into combatants, applying defaults for missing stats
pub fn spawn_enemies(specs: &[EnemySpec], defaults: &EnemyDefaults) -> CombatResult<Vec<Combatant>> {
    if specs.is_empty() {
        return Err(CombatError::invalid_request("enemy roster is empty"));
    }

    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let name = spec.name.trim();
            if name.is_empty() {
                return Err(CombatError::invalid_request(format!(
                    "enemy #{} has no name",
                    i + 1
                )));
            }
            if spec.hp <= 0 {
                return Err(CombatError::invalid_request(format!(
                    "enemy '{}' must start with positive hp",
                    name
                )));
            }

            let damage_dice = spec
                .damage_dice
                .clone()
                .unwrap_or_else(|| defaults.damage_dice.clone());
            parse_dice(&damage_dice)?;

            let attack_bonus = spec.attack_bonus.unwrap_or(defaults.attack_bonus);
            let damage_bonus = spec.damage_bonus.unwrap_or(defaults.damage_bonus);
            check_stat(name, "ac", spec.ac)?;
            check_stat(name, "attack_bonus", attack_bonus)?;
            check_stat(name, "damage_bonus", damage_bonus)?;

            Ok(Combatant {
                id: enemy_id(i + 1),
                name: name.to_string(),
                hp: spec.hp,
                hp_max: spec.hp,
                armor_class: spec.ac,
                initiative: 0,
                attack_bonus,
                damage_dice,
                damage_bonus,
            })
        })
        .collect()
}
