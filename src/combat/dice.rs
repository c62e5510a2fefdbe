//! Dice rolling system
//!
//! Parses and rolls dice notation like "2d6+3", "d20", "1d8-2".
//! All randomness flows through a [`DieRoller`], so callers decide whether the
//! faces come from an RNG or from a fixed script.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on dice per expression
pub const MAX_DICE: u32 = 100;
/// Upper bound on faces per die
pub const MAX_SIDES: u32 = 1000;
/// Upper bound on the magnitude of a flat modifier
pub const MAX_MODIFIER: i32 = 1000;

/// Dice parsing and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("invalid dice expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("expected {expected} dice faces, got {got}")]
    FaceCount { expected: usize, got: usize },

    #[error("face {face} is out of range for a d{sides}")]
    FaceOutOfRange { face: u32, sides: u32 },
}

impl DiceError {
    fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        DiceError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Advantage state for d20 rolls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

/// Source of individual die faces
pub trait DieRoller {
    /// Roll one die, returning a face in `1..=sides`
    fn roll_die(&mut self, sides: u32) -> u32;
}

/// Die roller backed by any `rand` generator
#[derive(Debug, Clone)]
pub struct RngRoller<R>(R);

impl<R: Rng> RngRoller<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl RngRoller<StdRng> {
    /// Deterministic roller for reproducible sessions
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// Roller seeded from the operating system
    pub fn from_os_rng() -> Self {
        Self(StdRng::from_os_rng())
    }
}

impl<R: Rng> DieRoller for RngRoller<R> {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.0.random_range(1..=sides)
    }
}

/// Die roller that replays a fixed list of faces.
///
/// Faces are clamped into `1..=sides`. Once the script is used up, the last
/// face repeats (or 1 if the script was empty).
#[derive(Debug, Clone, Default)]
pub struct ScriptedRoller {
    faces: VecDeque<u32>,
    last: Option<u32>,
}

impl ScriptedRoller {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
            last: None,
        }
    }

    /// Append more faces to the end of the script
    pub fn push(&mut self, faces: impl IntoIterator<Item = u32>) {
        self.faces.extend(faces);
    }

    /// Faces not yet consumed
    pub fn remaining(&self) -> usize {
        self.faces.len()
    }
}

impl DieRoller for ScriptedRoller {
    fn roll_die(&mut self, sides: u32) -> u32 {
        let face = self.faces.pop_front().or(self.last).unwrap_or(1);
        self.last = Some(face);
        face.clamp(1, sides.max(1))
    }
}

/// Outcome of rolling an expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    /// Expression that was rolled
    pub expression: String,
    /// Faces that count toward the total
    pub rolls: Vec<u32>,
    /// Flat modifier added once
    pub modifier: i32,
    /// Sum of `rolls` plus `modifier`
    pub total: i32,
    /// Face kept under advantage/disadvantage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kept_roll: Option<u32>,
    /// Face thrown away under advantage/disadvantage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discarded_roll: Option<u32>,
    /// Damage dice were doubled for a critical hit
    #[serde(default)]
    pub critical: bool,
}

impl RollResult {
    /// The single d20 face that decided a to-hit roll
    pub fn natural(&self) -> u32 {
        self.kept_roll
            .or_else(|| self.rolls.first().copied())
            .unwrap_or(0)
    }
}

/// A parsed dice roll specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Modifier to add/subtract
    pub modifier: i32,
}

impl DiceRoll {
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count,
            sides,
            modifier,
        }
    }

    /// A single d20
    pub fn d20() -> Self {
        Self::new(1, 20, 0)
    }

    /// Whether advantage/disadvantage can apply to this expression
    pub fn is_single_d20(&self) -> bool {
        self.count == 1 && self.sides == 20
    }

    /// Number of dice thrown, doubled for a critical hit
    pub fn dice_count(&self, critical: bool) -> usize {
        let count = if critical { self.count * 2 } else { self.count };
        count as usize
    }

    /// Roll the expression.
    ///
    /// Advantage only applies to a bare `1d20`; for anything else it is
    /// ignored and the dice are rolled normally.
    pub fn roll<R: DieRoller + ?Sized>(&self, roller: &mut R, advantage: Advantage) -> RollResult {
        if self.is_single_d20() && advantage != Advantage::Normal {
            let a = roller.roll_die(20);
            let b = roller.roll_die(20);
            let (kept, discarded) = match advantage {
                Advantage::Advantage => (a.max(b), a.min(b)),
                _ => (a.min(b), a.max(b)),
            };
            return RollResult {
                expression: self.to_string(),
                rolls: vec![kept],
                modifier: self.modifier,
                total: (kept as i32).saturating_add(self.modifier),
                kept_roll: Some(kept),
                discarded_roll: Some(discarded),
                critical: false,
            };
        }

        let rolls: Vec<u32> = (0..self.count).map(|_| roller.roll_die(self.sides)).collect();
        self.summarize(rolls, self.modifier, false)
    }

    /// Roll damage, doubling the base dice on a critical.
    ///
    /// `extra_bonus` is a flat bonus added once, alongside the expression's
    /// own modifier, regardless of the critical.
    pub fn roll_damage<R: DieRoller + ?Sized>(
        &self,
        roller: &mut R,
        critical: bool,
        extra_bonus: i32,
    ) -> RollResult {
        let rolls: Vec<u32> = (0..self.dice_count(critical))
            .map(|_| roller.roll_die(self.sides))
            .collect();
        self.summarize(rolls, self.modifier.saturating_add(extra_bonus), critical)
    }

    /// Total externally rolled damage faces against this expression
    pub fn from_faces(
        &self,
        faces: &[u32],
        critical: bool,
        extra_bonus: i32,
    ) -> Result<RollResult, DiceError> {
        let expected = self.dice_count(critical);
        if faces.len() != expected {
            return Err(DiceError::FaceCount {
                expected,
                got: faces.len(),
            });
        }
        if let Some(&face) = faces.iter().find(|f| **f == 0 || **f > self.sides) {
            return Err(DiceError::FaceOutOfRange {
                face,
                sides: self.sides,
            });
        }
        Ok(self.summarize(
            faces.to_vec(),
            self.modifier.saturating_add(extra_bonus),
            critical,
        ))
    }

    fn summarize(&self, rolls: Vec<u32>, modifier: i32, critical: bool) -> RollResult {
        let sum = rolls
            .iter()
            .fold(0i32, |acc, &face| acc.saturating_add(face as i32));
        RollResult {
            expression: self.to_string(),
            total: sum.saturating_add(modifier),
            rolls,
            modifier,
            kept_roll: None,
            discarded_roll: None,
            critical,
        }
    }
}

impl FromStr for DiceRoll {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifier > 0 {
            write!(f, "{}d{}+{}", self.count, self.sides, self.modifier)
        } else if self.modifier < 0 {
            write!(f, "{}d{}{}", self.count, self.sides, self.modifier)
        } else {
            write!(f, "{}d{}", self.count, self.sides)
        }
    }
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(notation: &str) -> Result<DiceRoll, DiceError> {
    let original = notation;
    let notation = notation.trim().to_lowercase();

    let d_pos = notation
        .find('d')
        .ok_or_else(|| DiceError::invalid(original, "missing 'd'"))?;

    // "d6" means "1d6"
    let count_str = &notation[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1
    } else {
        count_str
            .parse()
            .map_err(|_| DiceError::invalid(original, format!("bad dice count '{}'", count_str)))?
    };

    if count == 0 {
        return Err(DiceError::invalid(original, "dice count must be at least 1"));
    }
    if count > MAX_DICE {
        return Err(DiceError::invalid(
            original,
            format!("at most {} dice per expression", MAX_DICE),
        ));
    }

    let rest = &notation[d_pos + 1..];

    let (sides_str, modifier) = if let Some(plus_pos) = rest.find('+') {
        let mod_str = &rest[plus_pos + 1..];
        let modifier: i32 = mod_str
            .parse()
            .map_err(|_| DiceError::invalid(original, format!("bad modifier '{}'", mod_str)))?;
        (&rest[..plus_pos], modifier)
    } else if let Some(minus_pos) = rest.rfind('-').filter(|&p| p > 0) {
        // slice keeps the minus sign
        let mod_str = &rest[minus_pos..];
        let modifier: i32 = mod_str
            .parse()
            .map_err(|_| DiceError::invalid(original, format!("bad modifier '{}'", mod_str)))?;
        (&rest[..minus_pos], modifier)
    } else {
        (rest, 0)
    };

    let sides: u32 = sides_str
        .parse()
        .map_err(|_| DiceError::invalid(original, format!("bad die sides '{}'", sides_str)))?;

    if sides == 0 {
        return Err(DiceError::invalid(original, "die sides must be at least 1"));
    }
    if sides > MAX_SIDES {
        return Err(DiceError::invalid(
            original,
            format!("at most {} sides per die", MAX_SIDES),
        ));
    }
    if !(-MAX_MODIFIER..=MAX_MODIFIER).contains(&modifier) {
        return Err(DiceError::invalid(
            original,
            format!("modifier must be between -{0} and {0}", MAX_MODIFIER),
        ));
    }

    Ok(DiceRoll {
        count,
        sides,
        modifier,
    })
}

/// Parse and roll an expression in one step
pub fn roll<R: DieRoller + ?Sized>(
    expression: &str,
    roller: &mut R,
    advantage: Advantage,
) -> Result<RollResult, DiceError> {
    Ok(parse_dice(expression)?.roll(roller, advantage))
}

/// Check if a d20 roll is a natural 20 (critical hit)
pub fn is_critical(roll: u32) -> bool {
    roll == 20
}

/// Check if a d20 roll is a natural 1 (critical fail)
pub fn is_fumble(roll: u32) -> bool {
    roll == 1
}
