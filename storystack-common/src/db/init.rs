//! Database initialization
//!
//! Opens (or creates) the SQLite record store and makes sure the
//! `assets` table exists. Safe to call on every startup.

use crate::db::SchemaIntrospector;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the UI read while the import pipeline writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_assets_table(&pool).await?;

    Ok(pool)
}

/// Create the assets table (idempotent)
///
/// `tags` is a JSON array. `location` is free text stored independently
/// of tags. `content_fingerprint` is optional: older databases created
/// before fingerprinting existed lack the column, and callers detect that
/// through [`crate::db::SchemaIntrospector`] rather than by failing writes.
pub async fn create_assets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assets (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            collection_id TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'import',
            tags TEXT NOT NULL DEFAULT '[]',
            location TEXT,
            content_fingerprint TEXT,
            auto_tag_status TEXT NOT NULL DEFAULT 'none',
            batch_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    if SchemaIntrospector::has_column(pool, "assets", "content_fingerprint").await? {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_assets_owner_fingerprint ON assets(owner_id, content_fingerprint)",
        )
        .execute(pool)
        .await?;
    } else {
        tracing::warn!("assets table has no content_fingerprint column; duplicate detection disabled");
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_batch ON assets(batch_id)")
        .execute(pool)
        .await?;

    Ok(())
}
