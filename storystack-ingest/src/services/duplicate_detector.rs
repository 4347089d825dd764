//! Duplicate detection against the owner's existing assets

use crate::db::AssetStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Flags candidates whose fingerprint the owner already has
///
/// One store query per call. Only fingerprints seen before this import
/// count; two identical photos in the same pick list are not flagged.
#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn AssetStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    /// Indices into `candidates` that are duplicates, ascending
    ///
    /// Absent or empty fingerprints are never reported. A failed query is
    /// treated as "no duplicates" so the import proceeds.
    pub async fn find_duplicates(&self, owner_id: Uuid, candidates: &[Option<String>]) -> Vec<usize> {
        let lookup: Vec<String> = candidates
            .iter()
            .filter_map(|fp| fp.as_deref())
            .filter(|fp| !fp.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        if lookup.is_empty() {
            return Vec::new();
        }

        let existing = match self.store.existing_fingerprints(owner_id, &lookup).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(
                    owner_id = %owner_id,
                    error = %e,
                    "Duplicate lookup failed, continuing without duplicate detection"
                );
                return Vec::new();
            }
        };

        candidates
            .iter()
            .enumerate()
            .filter_map(|(index, fp)| match fp.as_deref() {
                Some(fp) if !fp.trim().is_empty() && existing.contains(fp) => Some(index),
                _ => None,
            })
            .collect()
    }
}
