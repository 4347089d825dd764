//! User edits to tags and location
//!
//! Edits are last-writer-wins and never touch the auto-tag status; an
//! auto-tag completion can still overwrite tags the user set while the
//! asset was pending.

use crate::db::AssetStore;
use crate::error::{IngestError, IngestResult};
use crate::models::AssetPatch;
use crate::services::asset_shadow::{write_through, AssetShadow};
use crate::services::status_reconciler::clean_tags;
use std::sync::Arc;
use storystack_common::EventBus;
use uuid::Uuid;

pub struct AssetEditor {
    store: Arc<dyn AssetStore>,
    shadow: Arc<AssetShadow>,
    event_bus: EventBus,
}

impl AssetEditor {
    pub fn new(store: Arc<dyn AssetStore>, shadow: Arc<AssetShadow>, event_bus: EventBus) -> Self {
        Self {
            store,
            shadow,
            event_bus,
        }
    }

    /// Replace the tag list
    pub async fn set_tags(&self, asset_id: Uuid, tags: Vec<String>) -> IngestResult<()> {
        let patch = AssetPatch::default().with_tags(clean_tags(&tags));
        self.edit(asset_id, patch).await
    }

    /// Set or clear the free-text location
    pub async fn set_location(&self, asset_id: Uuid, location: Option<String>) -> IngestResult<()> {
        let location = location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        let patch = AssetPatch {
            location: Some(location),
            ..Default::default()
        };
        self.edit(asset_id, patch).await
    }

    /// Load an asset into the local copies so edits are staged optimistically
    pub async fn open(&self, asset_id: Uuid) -> IngestResult<()> {
        let asset = self
            .store
            .get_asset(asset_id)
            .await?
            .ok_or(IngestError::UnknownAsset(asset_id))?;
        self.shadow.track(asset);
        Ok(())
    }

    async fn edit(&self, asset_id: Uuid, patch: AssetPatch) -> IngestResult<()> {
        write_through(&self.shadow, self.store.as_ref(), &self.event_bus, asset_id, &patch)
            .await
            .map_err(|e| {
                tracing::warn!(asset_id = %asset_id, error = %e, "Asset edit rejected by store");
                e
            })
    }
}
