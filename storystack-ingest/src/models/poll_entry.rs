//! Poll registry entry

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Outstanding deferred batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollEntry {
    pub batch_id: String,
    pub asset_ids: Vec<Uuid>,
    pub registered_at: DateTime<Utc>,
    pub attempt_count: u32,
}

impl PollEntry {
    pub fn new(batch_id: String, asset_ids: Vec<Uuid>, registered_at: DateTime<Utc>) -> Self {
        let mut entry = Self {
            batch_id,
            asset_ids: Vec::with_capacity(asset_ids.len()),
            registered_at,
            attempt_count: 0,
        };
        entry.merge_assets(asset_ids);
        entry
    }

    /// Add asset ids not already tracked, preserving order
    pub fn merge_assets(&mut self, asset_ids: impl IntoIterator<Item = Uuid>) {
        for id in asset_ids {
            if !self.asset_ids.contains(&id) {
                self.asset_ids.push(id);
            }
        }
    }
}
