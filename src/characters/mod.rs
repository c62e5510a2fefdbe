//! Character storage
//!
//! A character sheet is the persistent side of a combatant: combat reads a
//! snapshot of it when a fight starts and writes HP and XP back when the
//! fight is closed.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::{Executor, Sqlite};
use tracing::info;

use crate::combat::{check_stat, parse_dice, CombatError, CombatResult, Combatant, PLAYER_ID};

/// Persistent character data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub id: String,
    pub name: String,
    pub hp: i32,
    pub hp_max: i32,
    pub armor_class: i32,
    pub attack_bonus: i32,
    pub damage_dice: String,
    pub damage_bonus: i32,
    pub xp: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl CharacterSheet {
    /// Snapshot used as the player combatant
    pub fn to_combatant(&self) -> Combatant {
        Combatant {
            id: PLAYER_ID.to_string(),
            name: self.name.clone(),
            hp: self.hp,
            hp_max: self.hp_max,
            armor_class: self.armor_class,
            initiative: 0,
            attack_bonus: self.attack_bonus,
            damage_dice: self.damage_dice.clone(),
            damage_bonus: self.damage_bonus,
        }
    }
}

/// Fields accepted when creating a character
#[derive(Debug, Clone, Deserialize)]
pub struct NewCharacter {
    /// Generated when omitted
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub hp_max: i32,
    /// Starts at `hp_max` when omitted
    #[serde(default)]
    pub hp: Option<i32>,
    pub armor_class: i32,
    pub attack_bonus: i32,
    pub damage_dice: String,
    #[serde(default)]
    pub damage_bonus: i32,
}

type CharacterRow = (String, String, i32, i32, i32, i32, String, i32, i64, String, String);

const SELECT_CHARACTER: &str = r#"
    SELECT id, name, hp, hp_max, armor_class, attack_bonus, damage_dice, damage_bonus, xp,
           created_at, updated_at
    FROM characters WHERE id = ?
"#;

fn into_sheet(row: CharacterRow) -> CharacterSheet {
    let (
        id,
        name,
        hp,
        hp_max,
        armor_class,
        attack_bonus,
        damage_dice,
        damage_bonus,
        xp,
        created_at,
        updated_at,
    ) = row;
    CharacterSheet {
        id,
        name,
        hp,
        hp_max,
        armor_class,
        attack_bonus,
        damage_dice,
        damage_bonus,
        xp,
        created_at,
        updated_at,
    }
}

/// Character store over SQLite
#[derive(Debug, Clone)]
pub struct CharacterStore {
    pool: SqlitePool,
}

impl CharacterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a character sheet
    pub async fn create(&self, new: NewCharacter) -> CombatResult<CharacterSheet> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(CombatError::invalid_request("character name is required"));
        }
        if new.hp_max <= 0 {
            return Err(CombatError::invalid_request("hp_max must be positive"));
        }
        let hp = new.hp.unwrap_or(new.hp_max);
        if hp < 0 || hp > new.hp_max {
            return Err(CombatError::invalid_request(format!(
                "hp must be between 0 and {}",
                new.hp_max
            )));
        }
        parse_dice(&new.damage_dice)?;
        check_stat(name, "armor_class", new.armor_class)?;
        check_stat(name, "attack_bonus", new.attack_bonus)?;
        check_stat(name, "damage_bonus", new.damage_bonus)?;

        let id = new
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM characters WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(CombatError::invalid_request(format!(
                "character '{}' already exists",
                id
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO characters
                (id, name, hp, hp_max, armor_class, attack_bonus, damage_dice, damage_bonus, xp,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(hp)
        .bind(new.hp_max)
        .bind(new.armor_class)
        .bind(new.attack_bonus)
        .bind(new.damage_dice.trim())
        .bind(new.damage_bonus)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!("Created character {} ({})", name, id);
        self.require(&id).await
    }

    /// Get a character by id
    pub async fn get(&self, id: &str) -> CombatResult<Option<CharacterSheet>> {
        let row: Option<CharacterRow> = sqlx::query_as(SELECT_CHARACTER)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(into_sheet))
    }

    /// Get a character or fail with `NotFound`
    pub async fn require(&self, id: &str) -> CombatResult<CharacterSheet> {
        self.get(id)
            .await?
            .ok_or_else(|| CombatError::NotFound(format!("character '{}'", id)))
    }

    /// Write back the result of a fight
    pub async fn apply_combat_outcome(
        &self,
        id: &str,
        hp: i32,
        xp_delta: i64,
    ) -> CombatResult<CharacterSheet> {
        self.apply_combat_outcome_on(&self.pool, id, hp, xp_delta).await?;
        self.require(id).await
    }

    /// Set hp (clamped to `0..=hp_max`) and add XP on a caller-supplied connection
    pub async fn apply_combat_outcome_on<'c, E>(
        &self,
        executor: E,
        id: &str,
        hp: i32,
        xp_delta: i64,
    ) -> CombatResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let now = chrono::Utc::now().to_rfc3339();
        let updated = sqlx::query(
            r#"
            UPDATE characters
            SET hp = MIN(MAX(?, 0), hp_max), xp = xp + ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(hp)
        .bind(xp_delta.max(0))
        .bind(&now)
        .bind(id)
        .execute(executor)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CombatError::NotFound(format!("character '{}'", id)));
        }
        Ok(())
    }
}
