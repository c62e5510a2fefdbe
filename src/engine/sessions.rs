//! Combat session persistence

use sqlx::{Executor, Sqlite, SqlitePool};

use crate::combat::{CombatResult, CombatSession};

/// One JSON document per character in `combat_sessions`
#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the session for a character, if any
    pub async fn load(&self, character_id: &str) -> CombatResult<Option<CombatSession>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM combat_sessions WHERE character_id = ?")
                .bind(character_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((state,)) => Ok(Some(serde_json::from_str(&state)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a character's session
    pub async fn save_on<'c, E>(&self, executor: E, session: &CombatSession) -> CombatResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let state = serde_json::to_string(session)?;
        sqlx::query(
            r#"
            INSERT INTO combat_sessions (character_id, state, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(character_id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.character_id)
        .bind(&state)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Remove a character's session; returns whether one existed
    pub async fn delete_on<'c, E>(&self, executor: E, character_id: &str) -> CombatResult<bool>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let deleted = sqlx::query("DELETE FROM combat_sessions WHERE character_id = ?")
            .bind(character_id)
            .execute(executor)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }
}
