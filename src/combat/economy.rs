//! Per-activation action economy
//!
//! Each activation gets one standard action and one bonus action by default.
//! Consuming a spent counter is refused without mutating anything.

use serde::{Deserialize, Serialize};

/// Action and bonus-action budget of the active combatant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEconomy {
    pub action_remaining: u32,
    pub action_max: u32,
    pub bonus_action_remaining: u32,
    pub bonus_action_max: u32,
}

impl Default for ActionEconomy {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl ActionEconomy {
    /// Create a full budget
    pub fn new(action_max: u32, bonus_action_max: u32) -> Self {
        Self {
            action_remaining: action_max,
            action_max,
            bonus_action_remaining: bonus_action_max,
            bonus_action_max,
        }
    }

    /// Refill both counters for a new activation
    pub fn reset_for_activation(&mut self) {
        self.action_remaining = self.action_max;
        self.bonus_action_remaining = self.bonus_action_max;
    }

    /// Spend a standard action; false if none is left
    pub fn consume_action(&mut self) -> bool {
        if self.action_remaining == 0 {
            return false;
        }
        self.action_remaining -= 1;
        true
    }

    /// Spend a bonus action; false if none is left
    pub fn consume_bonus_action(&mut self) -> bool {
        if self.bonus_action_remaining == 0 {
            return false;
        }
        self.bonus_action_remaining -= 1;
        true
    }

    /// Nothing left to spend this activation
    pub fn is_exhausted(&self) -> bool {
        self.action_remaining == 0 && self.bonus_action_remaining == 0
    }
}
