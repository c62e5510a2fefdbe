//! Attack resolution
//!
//! A single attack is a to-hit roll followed, on a hit, by a damage roll.
//! The two halves are exposed separately so a hit can wait for a damage roll
//! supplied later by the client.

use serde::{Deserialize, Serialize};

use super::combatant::Combatant;
use super::dice::{is_critical, is_fumble, parse_dice, Advantage, DiceRoll, DieRoller, RollResult};
use super::error::{CombatError, CombatResult};

/// How a strike is made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackOptions {
    pub advantage: Advantage,
    /// Add the attacker's flat damage bonus to the damage roll
    pub include_damage_bonus: bool,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            advantage: Advantage::Normal,
            include_damage_bonus: true,
        }
    }
}

/// Outcome of the d20 half of an attack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToHit {
    /// The d20 roll, with the attack bonus as its modifier
    pub roll: RollResult,
    /// Natural face that decided the roll
    pub natural: u32,
    /// Total attack value (roll + bonus)
    pub attack_total: i32,
    pub target_ac: i32,
    pub hit: bool,
    pub critical: bool,
    pub fumble: bool,
}

impl ToHit {
    /// Judge a d20 roll against an armor class
    pub fn from_roll(roll: RollResult, target_ac: i32) -> Self {
        let natural = roll.natural();
        let critical = is_critical(natural);
        let fumble = is_fumble(natural);
        let attack_total = roll.total;

        // Critical always hits, fumble always misses
        let hit = critical || (!fumble && attack_total >= target_ac);

        Self {
            roll,
            natural,
            attack_total,
            target_ac,
            hit,
            critical,
            fumble,
        }
    }
}

/// Full result of one attack, as recorded in the attack log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackResult {
    pub attacker_id: String,
    pub attacker_name: String,
    pub target_id: String,
    pub target_name: String,
    pub to_hit: ToHit,
    /// Damage roll; absent on a miss
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<RollResult>,
    pub total_damage: i32,
    pub target_hp_before: i32,
    pub target_hp_after: i32,
    pub target_defeated: bool,
}

/// Roll to hit without touching hit points
pub fn roll_to_hit<R: DieRoller + ?Sized>(
    attacker: &Combatant,
    target: &Combatant,
    roller: &mut R,
    advantage: Advantage,
) -> ToHit {
    let d20 = DiceRoll::new(1, 20, attacker.attack_bonus);
    ToHit::from_roll(d20.roll(roller, advantage), target.armor_class)
}

/// Apply a damage roll (or a miss) to the target
pub fn apply_damage(
    attacker: &Combatant,
    target: &mut Combatant,
    to_hit: ToHit,
    damage: Option<RollResult>,
) -> AttackResult {
    let damage = if to_hit.hit { damage } else { None };
    let total_damage = damage.as_ref().map_or(0, |roll| roll.total.max(0));
    let (hp_before, hp_after) = target.take_damage(total_damage);

    AttackResult {
        attacker_id: attacker.id.clone(),
        attacker_name: attacker.name.clone(),
        target_id: target.id.clone(),
        target_name: target.name.clone(),
        to_hit,
        damage,
        total_damage,
        target_hp_before: hp_before,
        target_hp_after: hp_after,
        target_defeated: hp_after == 0,
    }
}

/// Damage expression of an attacker
pub fn damage_dice(attacker: &Combatant) -> CombatResult<DiceRoll> {
    parse_dice(&attacker.damage_dice).map_err(CombatError::from)
}

/// Flat bonus for a strike made with `options`
pub fn damage_bonus(attacker: &Combatant, options: AttackOptions) -> i32 {
    if options.include_damage_bonus {
        attacker.damage_bonus
    } else {
        0
    }
}

/// Resolve one attack end to end, mutating the target's hit points
pub fn resolve_attack<R: DieRoller + ?Sized>(
    attacker: &Combatant,
    target: &mut Combatant,
    roller: &mut R,
    options: AttackOptions,
) -> CombatResult<AttackResult> {
    // parse first so a bad expression never leaves a half-rolled attack
    let dice = damage_dice(attacker)?;
    let to_hit = roll_to_hit(attacker, target, roller, options.advantage);

    let damage = to_hit.hit.then(|| {
        dice.roll_damage(roller, to_hit.critical, damage_bonus(attacker, options))
    });

    Ok(apply_damage(attacker, target, to_hit, damage))
}
