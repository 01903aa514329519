//! Database pool construction and startup schema

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Connect to the SQLite database and ensure the schema exists
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // An in-memory SQLite database is per-connection; cap the pool at one
    // connection so every query sees the same database.
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        5
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create tables if they do not exist
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            upload_token TEXT NOT NULL,
            photo_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS photos (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            captured_at TEXT NOT NULL,
            web_path TEXT NOT NULL,
            thumbnail_path TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_photos_session ON photos(session_id, sequence)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    connect("sqlite::memory:")
        .await
        .expect("in-memory pool should connect")
}
