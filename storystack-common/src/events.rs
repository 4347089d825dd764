//! Event types for the StoryStack ingest core
//!
//! The orchestration layer never renders anything itself. Progress
//! counters, "currently tagging" membership changes and final tag lists
//! are broadcast as [`IngestEvent`]s; a UI subscribes and re-renders.

use crate::models::AutoTagStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// How an outstanding batch left the poll registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchResolution {
    Completed,
    Failed,
    /// Attempt ceiling reached without a terminal status
    Evicted,
}

/// Ingest event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag so
/// they can be forwarded to a UI as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// Import counters changed (all three are monotonically non-decreasing)
    ImportProgress {
        session_id: Uuid,
        /// Photos selected by the user
        total: usize,
        /// Photos through compression and hashing, failed ones included
        processed: usize,
        /// Asset records created
        imported: usize,
        timestamp: DateTime<Utc>,
    },

    /// Import suspended waiting for a duplicate decision
    DuplicatesFound {
        session_id: Uuid,
        /// Indices into the original pick list
        duplicate_indices: Vec<usize>,
        timestamp: DateTime<Utc>,
    },

    /// Import finished (or was cancelled at the duplicate prompt)
    ImportFinished {
        session_id: Uuid,
        imported: usize,
        failed: usize,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },

    /// Assets joined the "currently tagging" set
    TaggingStarted {
        asset_ids: Vec<Uuid>,
        /// Set once the deferred path has returned an identifier
        batch_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Asset left the "currently tagging" set
    TaggingFinished {
        asset_id: Uuid,
        status: AutoTagStatus,
        tags: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Optimistic change to the locally held copy of an asset
    AssetChanged {
        asset_id: Uuid,
        tags: Vec<String>,
        location: Option<String>,
        status: AutoTagStatus,
        timestamp: DateTime<Utc>,
    },

    /// Optimistic change rolled back after the store write failed
    AssetReverted {
        asset_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Deferred batch added to the poll registry
    BatchRegistered {
        batch_id: String,
        asset_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Deferred batch removed from the poll registry
    BatchResolved {
        batch_id: String,
        resolution: BatchResolution,
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Event type string, matching the serialized `type` tag
    pub fn event_type(&self) -> &str {
        match self {
            IngestEvent::ImportProgress { .. } => "ImportProgress",
            IngestEvent::DuplicatesFound { .. } => "DuplicatesFound",
            IngestEvent::ImportFinished { .. } => "ImportFinished",
            IngestEvent::TaggingStarted { .. } => "TaggingStarted",
            IngestEvent::TaggingFinished { .. } => "TaggingFinished",
            IngestEvent::AssetChanged { .. } => "AssetChanged",
            IngestEvent::AssetReverted { .. } => "AssetReverted",
            IngestEvent::BatchRegistered { .. } => "BatchRegistered",
            IngestEvent::BatchResolved { .. } => "BatchResolved",
        }
    }
}

/// Central event distribution bus
///
/// Cloning is cheap; every clone shares the same channel. Dropping a
/// receiver only ends that subscription, work already started keeps
/// running.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }
}
