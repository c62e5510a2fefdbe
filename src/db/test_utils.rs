//! Shared test utilities for database operations
//!
//! Every helper goes through `Database::new(None)`, so unit tests run
//! against the same migrations as the server.

use sqlx::SqlitePool;

use super::Database;

/// In-memory pool with the full schema
pub async fn test_pool() -> SqlitePool {
    let db = Database::new(None)
        .await
        .expect("Failed to create test database");
    db.pool().clone()
}

/// In-memory pool holding one character (AC 10, +5 to hit, 1d6+2)
pub async fn test_pool_with_character(id: &str, hp_max: i32) -> SqlitePool {
    let pool = test_pool().await;
    sqlx::query(
        r#"
        INSERT INTO characters
            (id, name, hp, hp_max, armor_class, attack_bonus, damage_dice, damage_bonus)
        VALUES (?, ?, ?, ?, 10, 5, '1d6', 2)
        "#,
    )
    .bind(id)
    .bind(id)
    .bind(hp_max)
    .bind(hp_max)
    .execute(&pool)
    .await
    .expect("Failed to insert test character");
    pool
}
