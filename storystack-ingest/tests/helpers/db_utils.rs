//! Database test utilities

use anyhow::Result;
use sqlx::SqlitePool;
use storystack_common::db::init_database;
use tempfile::TempDir;

/// Column information from PRAGMA table_info
#[derive(Debug, sqlx::FromRow)]
pub struct ColumnInfo {
    pub cid: i32,
    pub name: String,
    pub r#type: String,
    pub notnull: i32,
    pub dflt_value: Option<String>,
    pub pk: i32,
}

/// Temporary database with the current schema
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let pool = init_database(&temp_dir.path().join("storystack.db")).await?;
    Ok((temp_dir, pool))
}

/// Temporary database whose assets table predates fingerprinting
pub async fn create_legacy_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_url = format!("sqlite://{}?mode=rwc", temp_dir.path().join("legacy.db").display());
    let pool = SqlitePool::connect(&db_url).await?;
    sqlx::query(
        r#"
        CREATE TABLE assets (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            collection_id TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'import',
            tags TEXT NOT NULL DEFAULT '[]',
            location TEXT,
            auto_tag_status TEXT NOT NULL DEFAULT 'none',
            batch_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&pool)
    .await?;
    Ok((temp_dir, pool))
}

/// Drop the fingerprint column out from under an open store
pub async fn drop_fingerprint_column(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DROP INDEX IF EXISTS idx_assets_owner_fingerprint")
        .execute(pool)
        .await?;
    sqlx::query("ALTER TABLE assets DROP COLUMN content_fingerprint")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let query = format!("PRAGMA table_info({})", table_name);
    let columns = sqlx::query_as::<_, ColumnInfo>(&query)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

pub async fn has_column(pool: &SqlitePool, table_name: &str, column_name: &str) -> Result<bool> {
    let columns = get_table_columns(pool, table_name).await?;
    Ok(columns.iter().any(|c| c.name == column_name))
}
