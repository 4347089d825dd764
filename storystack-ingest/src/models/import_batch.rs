//! Import session types

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storystack_common::{EventBus, IngestEvent};
use uuid::Uuid;

/// Photo as picked by the user, before normalization
#[derive(Debug, Clone)]
pub struct RawPick {
    /// Display name (file name for CLI imports)
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawPick {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Normalized, fingerprinted photo awaiting upload
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Index into the original pick list
    pub pick_index: usize,
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
    /// `None` when hashing failed; such items are never flagged as duplicates
    pub fingerprint: Option<String>,
}

/// User answer to the duplicate prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    /// Import everything, duplicates included
    ProceedAll,
    /// Import only the non-duplicates
    SkipDuplicates,
    /// Write nothing
    Cancel,
}

impl std::str::FromStr for DuplicateDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "proceed" => Ok(DuplicateDecision::ProceedAll),
            "skip" => Ok(DuplicateDecision::SkipDuplicates),
            "cancel" => Ok(DuplicateDecision::Cancel),
            other => Err(format!("unknown duplicate decision '{}'", other)),
        }
    }
}

/// Stage at which a single photo failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Normalize,
    Upload,
    Record,
}

/// Per-photo failure; never aborts the rest of the import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub pick_index: usize,
    pub name: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Point-in-time copy of the import counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub imported: usize,
}

/// Import counters shared between the pipeline and its observers
///
/// Counters only ever increase. Every change is pushed as
/// `IngestEvent::ImportProgress`.
#[derive(Debug, Clone)]
pub struct ImportProgress {
    session_id: Uuid,
    total: Arc<AtomicUsize>,
    processed: Arc<AtomicUsize>,
    imported: Arc<AtomicUsize>,
    event_bus: EventBus,
}

impl ImportProgress {
    pub fn new(session_id: Uuid, total: usize, event_bus: EventBus) -> Self {
        Self {
            session_id,
            total: Arc::new(AtomicUsize::new(total)),
            processed: Arc::new(AtomicUsize::new(0)),
            imported: Arc::new(AtomicUsize::new(0)),
            event_bus,
        }
    }

    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.publish();
    }

    pub fn inc_imported(&self) {
        self.imported.fetch_add(1, Ordering::SeqCst);
        self.publish();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            imported: self.imported.load(Ordering::SeqCst),
        }
    }

    pub fn publish(&self) {
        let snapshot = self.snapshot();
        self.event_bus.emit_lossy(IngestEvent::ImportProgress {
            session_id: self.session_id,
            total: snapshot.total,
            processed: snapshot.processed,
            imported: snapshot.imported,
            timestamp: Utc::now(),
        });
    }
}

/// Output of the prepare phase; nothing has been written yet
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub session_id: Uuid,
    pub owner_id: Uuid,
    pub collection_id: Uuid,
    /// In pick order
    pub items: Vec<PreparedImage>,
    pub failures: Vec<ItemFailure>,
    /// Pick indices whose fingerprint already exists for this owner
    pub duplicate_indices: Vec<usize>,
    pub progress: ImportProgress,
}

impl ImportBatch {
    pub fn has_duplicates(&self) -> bool {
        !self.duplicate_indices.is_empty()
    }
}
