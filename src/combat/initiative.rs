//! Initiative and turn order
//!
//! Initiative is rolled once per combatant at combat start. The turn order
//! is always derived from those stored values: descending initiative, with
//! enemies ahead of the player on a tie. Enemies tied with each other keep
//! roster order because the sort is stable.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use super::combatant::Combatant;
use super::dice::{Advantage, DiceRoll, DieRoller};

/// One slot in the activation sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub id: String,
    pub name: String,
    pub initiative: i32,
    pub is_player: bool,
}

impl TurnEntry {
    fn from_combatant(c: &Combatant, is_player: bool) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            initiative: c.initiative,
            is_player,
        }
    }
}

/// Roll a d20 initiative for every enemy (roster order) and then the player
pub fn roll_initiative<R: DieRoller + ?Sized>(
    player: &mut Combatant,
    enemies: &mut [Combatant],
    roller: &mut R,
) {
    let d20 = DiceRoll::d20();
    for enemy in enemies.iter_mut() {
        enemy.initiative = d20.roll(roller, Advantage::Normal).total;
    }
    player.initiative = d20.roll(roller, Advantage::Normal).total;
}

/// Merge the player and living enemies into activation order
pub fn build_turn_order(player: &Combatant, enemies: &[Combatant]) -> Vec<TurnEntry> {
    let mut order: Vec<TurnEntry> = enemies
        .iter()
        .filter(|e| e.is_alive())
        .map(|e| TurnEntry::from_combatant(e, false))
        .chain(std::iter::once(TurnEntry::from_combatant(player, true)))
        .collect();

    order.sort_by_key(|entry| (Reverse(entry.initiative), entry.is_player));
    order
}

/// Rebuild the order after a death and relocate the turn pointer.
///
/// The pointer follows `active_id` when that combatant is still in the
/// order; otherwise it is clamped to the last slot.
pub fn rebuild_turn_order(
    player: &Combatant,
    enemies: &[Combatant],
    current_index: usize,
    active_id: Option<&str>,
) -> (Vec<TurnEntry>, usize) {
    let order = build_turn_order(player, enemies);
    let followed = active_id.and_then(|id| order.iter().position(|e| e.id == id));
    let index = followed.unwrap_or_else(|| current_index.min(order.len().saturating_sub(1)));
    (order, index)
}
