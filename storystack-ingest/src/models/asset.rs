//! Asset records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storystack_common::AutoTagStatus;
use uuid::Uuid;

/// Source label for records created by the import pipeline
pub const IMPORT_SOURCE: &str = "import";

/// Stored photo record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub collection_id: Uuid,
    /// Blob path, `{owner}/{collection}/{uuid}.{ext}`
    pub storage_path: String,
    pub source: String,
    /// Display order is significant
    pub tags: Vec<String>,
    pub location: Option<String>,
    pub content_fingerprint: Option<String>,
    pub auto_tag_status: AutoTagStatus,
    /// Deferred batch this asset is waiting on
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a record
#[derive(Debug, Clone, PartialEq)]
pub struct NewAsset {
    pub owner_id: Uuid,
    pub collection_id: Uuid,
    pub storage_path: String,
    pub source: String,
    pub tags: Vec<String>,
    pub content_fingerprint: Option<String>,
}

impl NewAsset {
    pub fn imported(
        owner_id: Uuid,
        collection_id: Uuid,
        storage_path: String,
        content_fingerprint: Option<String>,
    ) -> Self {
        Self {
            owner_id,
            collection_id,
            storage_path,
            source: IMPORT_SOURCE.to_string(),
            tags: Vec::new(),
            content_fingerprint,
        }
    }

    /// Same record without the fingerprint (stores lacking the column)
    pub fn without_fingerprint(&self) -> Self {
        Self {
            content_fingerprint: None,
            ..self.clone()
        }
    }

    pub fn into_asset(self, id: Uuid, now: DateTime<Utc>) -> Asset {
        Asset {
            id,
            owner_id: self.owner_id,
            collection_id: self.collection_id,
            storage_path: self.storage_path,
            source: self.source,
            tags: self.tags,
            location: None,
            content_fingerprint: self.content_fingerprint,
            auto_tag_status: AutoTagStatus::None,
            batch_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; `None` leaves a field untouched
///
/// `location` and `batch_id` are nullable, so they use `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetPatch {
    pub tags: Option<Vec<String>>,
    pub location: Option<Option<String>>,
    pub auto_tag_status: Option<AutoTagStatus>,
    pub batch_id: Option<Option<String>>,
}

impl AssetPatch {
    pub fn status(status: AutoTagStatus) -> Self {
        Self {
            auto_tag_status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_batch_id(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_none()
            && self.location.is_none()
            && self.auto_tag_status.is_none()
            && self.batch_id.is_none()
    }

    /// Apply to an in-memory copy
    pub fn apply_to(&self, asset: &mut Asset) {
        if let Some(tags) = &self.tags {
            asset.tags = tags.clone();
        }
        if let Some(location) = &self.location {
            asset.location = location.clone();
        }
        if let Some(status) = self.auto_tag_status {
            asset.auto_tag_status = status;
        }
        if let Some(batch_id) = &self.batch_id {
            asset.batch_id = batch_id.clone();
        }
    }
}
