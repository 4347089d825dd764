//! In-flight, suppression and last-failure tracking for auto-tagging
//!
//! Membership in the tagging set is the single source of truth for
//! "a tag request for this asset is outstanding". Check-then-insert
//! happens under one lock, so two concurrent requests for the same asset
//! cannot both be admitted.

use crate::models::TagFailure;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct RegistryState {
    tagging: HashSet<Uuid>,
    suppressed: HashSet<Uuid>,
    last_failures: HashMap<Uuid, TagFailure>,
}

#[derive(Debug, Default)]
pub struct TaggingRegistry {
    state: Mutex<RegistryState>,
}

impl TaggingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `asset_id` into the tagging set; false if already a member
    pub fn try_begin(&self, asset_id: Uuid) -> bool {
        self.lock().tagging.insert(asset_id)
    }

    /// Remove from the tagging set; false if it was not a member
    pub fn finish(&self, asset_id: Uuid) -> bool {
        self.lock().tagging.remove(&asset_id)
    }

    pub fn is_tagging(&self, asset_id: Uuid) -> bool {
        self.lock().tagging.contains(&asset_id)
    }

    /// Current members, sorted for stable display
    pub fn tagging_snapshot(&self) -> Vec<Uuid> {
        let mut members: Vec<Uuid> = self.lock().tagging.iter().copied().collect();
        members.sort();
        members
    }

    pub fn tagging_count(&self) -> usize {
        self.lock().tagging.len()
    }

    /// Exclude from automatic re-dispatch until the user retries
    pub fn suppress(&self, asset_id: Uuid) {
        self.lock().suppressed.insert(asset_id);
    }

    pub fn clear_suppression(&self, asset_id: Uuid) -> bool {
        self.lock().suppressed.remove(&asset_id)
    }

    pub fn is_suppressed(&self, asset_id: Uuid) -> bool {
        self.lock().suppressed.contains(&asset_id)
    }

    pub fn record_failure(&self, asset_id: Uuid, failure: TagFailure) {
        self.lock().last_failures.insert(asset_id, failure);
    }

    pub fn clear_failure(&self, asset_id: Uuid) {
        self.lock().last_failures.remove(&asset_id);
    }

    /// Why the asset's most recent tag attempt failed, if it did
    pub fn last_failure(&self, asset_id: Uuid) -> Option<TagFailure> {
        self.lock().last_failures.get(&asset_id).cloned()
    }
}
