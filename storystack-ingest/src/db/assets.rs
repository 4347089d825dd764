//! Asset store
//!
//! [`AssetStore`] is the seam between the ingest services and the record
//! store. [`SqliteAssetStore`] is the production implementation; tests
//! substitute in-memory stores.

use crate::models::{Asset, AssetPatch, NewAsset};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use storystack_common::db::SchemaIntrospector;
use storystack_common::{AutoTagStatus, Error, Result};
use uuid::Uuid;

const ASSETS_TABLE: &str = "assets";
const FINGERPRINT_COLUMN: &str = "content_fingerprint";

/// Stays well under SQLite's bound-parameter limit
const FINGERPRINT_QUERY_CHUNK: usize = 500;

/// Record store operations used by the ingest core
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn create_asset(&self, new_asset: &NewAsset) -> Result<Asset>;

    async fn get_asset(&self, id: Uuid) -> Result<Option<Asset>>;

    /// Apply a partial update. `Error::NotFound` if the record is gone.
    async fn update_asset(&self, id: Uuid, patch: &AssetPatch) -> Result<()>;

    /// Subset of `candidates` already stored for `owner_id`
    async fn existing_fingerprints(
        &self,
        owner_id: Uuid,
        candidates: &[String],
    ) -> Result<HashSet<String>>;

    async fn list_by_status(&self, owner_id: Uuid, status: AutoTagStatus) -> Result<Vec<Asset>>;
}

/// Optional columns detected when the store is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub content_fingerprint: bool,
}

/// SQLite-backed asset store
#[derive(Clone)]
pub struct SqliteAssetStore {
    pool: SqlitePool,
    capabilities: StoreCapabilities,
    max_lock_wait_ms: u64,
}

impl SqliteAssetStore {
    /// Open over an initialized pool, probing for optional columns
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let content_fingerprint =
            SchemaIntrospector::has_column(&pool, ASSETS_TABLE, FINGERPRINT_COLUMN).await?;
        if !content_fingerprint {
            tracing::warn!(
                "Asset store has no {} column; importing without duplicate detection",
                FINGERPRINT_COLUMN
            );
        }

        Ok(Self {
            pool,
            capabilities: StoreCapabilities { content_fingerprint },
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        })
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn select_columns(&self) -> &'static str {
        if self.capabilities.content_fingerprint {
            "id, owner_id, collection_id, storage_path, source, tags, location, \
             content_fingerprint, auto_tag_status, batch_id, \
             CAST(created_at AS TEXT) AS created_at, CAST(updated_at AS TEXT) AS updated_at"
        } else {
            "id, owner_id, collection_id, storage_path, source, tags, location, \
             NULL AS content_fingerprint, auto_tag_status, batch_id, \
             CAST(created_at AS TEXT) AS created_at, CAST(updated_at AS TEXT) AS updated_at"
        }
    }
}

#[async_trait]
impl AssetStore for SqliteAssetStore {
    async fn create_asset(&self, new_asset: &NewAsset) -> Result<Asset> {
        let mut new_asset = new_asset.clone();
        if !self.capabilities.content_fingerprint && new_asset.content_fingerprint.is_some() {
            tracing::debug!("Dropping fingerprint, column unavailable");
            new_asset.content_fingerprint = None;
        }

        let asset = new_asset.into_asset(Uuid::new_v4(), Utc::now());
        let tags_json = serde_json::to_string(&asset.tags)
            .map_err(|e| Error::Internal(format!("Failed to encode tags: {}", e)))?;
        // Column left out entirely when there is no fingerprint to write
        let with_fingerprint = asset.content_fingerprint.is_some();

        retry_on_lock("create asset", self.max_lock_wait_ms, || async {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO assets (id, owner_id, collection_id, storage_path, source, tags, \
                 auto_tag_status, created_at, updated_at",
            );
            if with_fingerprint {
                qb.push(", content_fingerprint");
            }
            qb.push(") VALUES (");
            {
                let mut values = qb.separated(", ");
                values.push_bind(asset.id.to_string());
                values.push_bind(asset.owner_id.to_string());
                values.push_bind(asset.collection_id.to_string());
                values.push_bind(&asset.storage_path);
                values.push_bind(&asset.source);
                values.push_bind(&tags_json);
                values.push_bind(asset.auto_tag_status.as_str());
                values.push_bind(asset.created_at.to_rfc3339());
                values.push_bind(asset.updated_at.to_rfc3339());
                if with_fingerprint {
                    values.push_bind(asset.content_fingerprint.as_deref());
                }
            }
            qb.push(")");

            qb.build()
                .execute(&self.pool)
                .await
                .map_err(map_schema_error)?;
            Ok(())
        })
        .await?;

        Ok(asset)
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<Asset>> {
        let sql = format!("SELECT {} FROM assets WHERE id = ?", self.select_columns());
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_asset).transpose()
    }

    async fn update_asset(&self, id: Uuid, patch: &AssetPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let tags_json = patch
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to encode tags: {}", e)))?;

        let rows = retry_on_lock("update asset", self.max_lock_wait_ms, || async {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE assets SET updated_at = ");
            qb.push_bind(Utc::now().to_rfc3339());
            if let Some(tags) = &tags_json {
                qb.push(", tags = ").push_bind(tags);
            }
            if let Some(location) = &patch.location {
                qb.push(", location = ").push_bind(location.as_deref());
            }
            if let Some(status) = patch.auto_tag_status {
                qb.push(", auto_tag_status = ").push_bind(status.as_str());
            }
            if let Some(batch_id) = &patch.batch_id {
                qb.push(", batch_id = ").push_bind(batch_id.as_deref());
            }
            qb.push(" WHERE id = ").push_bind(id.to_string());

            let result = qb.build().execute(&self.pool).await.map_err(map_schema_error)?;
            Ok(result.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("asset {}", id)));
        }
        Ok(())
    }

    async fn existing_fingerprints(
        &self,
        owner_id: Uuid,
        candidates: &[String],
    ) -> Result<HashSet<String>> {
        let mut found = HashSet::new();
        if !self.capabilities.content_fingerprint || candidates.is_empty() {
            return Ok(found);
        }

        for chunk in candidates.chunks(FINGERPRINT_QUERY_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT DISTINCT content_fingerprint FROM assets WHERE owner_id = ",
            );
            qb.push_bind(owner_id.to_string());
            qb.push(" AND content_fingerprint IN (");
            {
                let mut list = qb.separated(", ");
                for fingerprint in chunk {
                    list.push_bind(fingerprint);
                }
            }
            qb.push(")");

            let rows = qb
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(map_schema_error)?;
            for row in rows {
                let fingerprint: Option<String> = row.try_get("content_fingerprint")?;
                if let Some(fingerprint) = fingerprint {
                    found.insert(fingerprint);
                }
            }
        }

        Ok(found)
    }

    async fn list_by_status(&self, owner_id: Uuid, status: AutoTagStatus) -> Result<Vec<Asset>> {
        let sql = format!(
            "SELECT {} FROM assets WHERE owner_id = ? AND auto_tag_status = ? ORDER BY created_at, id",
            self.select_columns()
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id.to_string())
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_asset).collect()
    }
}

/// Translate SQLite "unknown column" errors into `Error::SchemaDrift`
fn map_schema_error(err: sqlx::Error) -> Error {
    let msg = err.to_string();
    if msg.contains(FINGERPRINT_COLUMN)
        && (msg.contains("no such column") || msg.contains("has no column named"))
    {
        return Error::SchemaDrift {
            table: ASSETS_TABLE.to_string(),
            column: FINGERPRINT_COLUMN.to_string(),
        };
    }
    Error::Database(err)
}

fn row_to_asset(row: &SqliteRow) -> Result<Asset> {
    let tags_json: String = row.try_get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| Error::Internal(format!("Corrupt tags column: {}", e)))?;
    let status: String = row.try_get("auto_tag_status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Asset {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        owner_id: parse_uuid(&row.try_get::<String, _>("owner_id")?)?,
        collection_id: parse_uuid(&row.try_get::<String, _>("collection_id")?)?,
        storage_path: row.try_get("storage_path")?,
        source: row.try_get("source")?,
        tags,
        location: row.try_get("location")?,
        content_fingerprint: row.try_get("content_fingerprint")?,
        auto_tag_status: status.parse()?,
        batch_id: row.try_get("batch_id")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}

/// RFC 3339 as written by this store, or SQLite's `CURRENT_TIMESTAMP` format
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}
