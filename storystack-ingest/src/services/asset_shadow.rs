//! Locally held asset copies
//!
//! The UI renders from these copies. Changes are applied here first and
//! rolled back if the store rejects them. Each change bumps a revision so
//! a rollback never clobbers a newer change that landed in between.

use crate::db::AssetStore;
use crate::error::IngestResult;
use crate::models::{Asset, AssetPatch};
use chrono::Utc;
use std::collections::HashMap;
use storystack_common::{EventBus, IngestEvent};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug)]
struct ShadowEntry {
    asset: Asset,
    revision: u64,
}

/// Token for undoing one staged change
#[derive(Debug, Clone)]
pub struct StagedChange {
    pub asset_id: Uuid,
    previous: Asset,
    revision: u64,
}

#[derive(Debug, Default)]
pub struct AssetShadow {
    entries: Mutex<HashMap<Uuid, ShadowEntry>>,
}

impl AssetShadow {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ShadowEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold (or replace) the local copy of `asset`
    pub fn track(&self, asset: Asset) {
        let mut entries = self.lock();
        let revision = entries.get(&asset.id).map_or(0, |e| e.revision + 1);
        entries.insert(asset.id, ShadowEntry { asset, revision });
    }

    pub fn get(&self, asset_id: Uuid) -> Option<Asset> {
        self.lock().get(&asset_id).map(|e| e.asset.clone())
    }

    /// Ids of every locally held asset, sorted
    pub fn ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply `change` to the local copy
    ///
    /// Returns the undo token and the updated copy, or `None` when the
    /// asset is not held locally.
    pub fn stage<F>(&self, asset_id: Uuid, change: F) -> Option<(StagedChange, Asset)>
    where
        F: FnOnce(&mut Asset),
    {
        let mut entries = self.lock();
        let entry = entries.get_mut(&asset_id)?;
        let previous = entry.asset.clone();
        change(&mut entry.asset);
        entry.revision += 1;

        Some((
            StagedChange {
                asset_id,
                previous,
                revision: entry.revision,
            },
            entry.asset.clone(),
        ))
    }

    /// Undo a staged change
    ///
    /// Only succeeds if nothing else changed the copy since; returns
    /// whether the rollback was applied.
    pub fn revert(&self, staged: StagedChange) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(&staged.asset_id) {
            Some(entry) if entry.revision == staged.revision => {
                entry.asset = staged.previous;
                entry.revision += 1;
                true
            }
            _ => false,
        }
    }
}

/// Apply `patch` to the local copy, then to the store
///
/// Emits `AssetChanged` for the local change and `AssetReverted` if the
/// store write fails and the rollback applies. Assets not held locally
/// only get the store write.
pub(crate) async fn write_through(
    shadow: &AssetShadow,
    store: &dyn AssetStore,
    event_bus: &EventBus,
    asset_id: Uuid,
    patch: &AssetPatch,
) -> IngestResult<()> {
    let staged = shadow.stage(asset_id, |asset| patch.apply_to(asset));
    if let Some((_, updated)) = &staged {
        event_bus.emit_lossy(IngestEvent::AssetChanged {
            asset_id,
            tags: updated.tags.clone(),
            location: updated.location.clone(),
            status: updated.auto_tag_status,
            timestamp: Utc::now(),
        });
    }

    if let Err(e) = store.update_asset(asset_id, patch).await {
        if let Some((change, _)) = staged {
            if shadow.revert(change) {
                event_bus.emit_lossy(IngestEvent::AssetReverted {
                    asset_id,
                    timestamp: Utc::now(),
                });
            }
        }
        return Err(e.into());
    }
    Ok(())
}
