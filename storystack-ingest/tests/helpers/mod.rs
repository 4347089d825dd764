//! Test helper utilities
//!
//! Shared fakes, synthetic photos, log capture and context wiring for the
//! storystack-ingest integration tests.
#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;
pub mod images;
pub mod log_capture;

pub use fakes::{tags_for, FakeClassifier, FixedClock, MemoryAssetStore, MemoryBlobStore};
pub use images::{picks, unique_png};
pub use log_capture::{capture_logs, LogCapture};

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use storystack_common::{EventBus, IngestEvent};
use storystack_ingest::config::IngestSettings;
use storystack_ingest::models::{Asset, RawPick, TagTarget};
use storystack_ingest::services::ImportRequest;
use storystack_ingest::IngestContext;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Context over in-memory fakes
pub struct Harness {
    pub ctx: IngestContext,
    pub store: Arc<MemoryAssetStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub classifier: Arc<FakeClassifier>,
    pub owner: Uuid,
    pub collection: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(IngestSettings::default())
    }

    pub fn with_settings(settings: IngestSettings) -> Self {
        let store = MemoryAssetStore::new();
        let blobs = MemoryBlobStore::new();
        let classifier = FakeClassifier::new();
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let ctx = IngestContext::with_clock(
            &settings,
            store.clone(),
            blobs.clone(),
            classifier.clone(),
            clock,
        );
        Self {
            ctx,
            store,
            blobs,
            classifier,
            owner: Uuid::new_v4(),
            collection: Uuid::new_v4(),
        }
    }

    pub fn request(&self, picks: Vec<RawPick>) -> ImportRequest {
        ImportRequest {
            owner_id: self.owner,
            collection_id: self.collection,
            picks,
        }
    }

    /// Stored asset that is also held locally, ready to be dispatched
    pub fn tracked_asset(&self) -> Asset {
        let asset = self.store.seed(self.owner, None);
        self.ctx.shadow.track(asset.clone());
        asset
    }

    pub fn target(&self, asset: &Asset) -> TagTarget {
        TagTarget {
            asset_id: asset.id,
            image_url: self.ctx.blobs.public_url(&asset.storage_path),
            current_status: asset.auto_tag_status,
        }
    }

    /// Targets for `count` fresh tracked assets
    pub fn targets(&self, count: usize) -> Vec<TagTarget> {
        (0..count).map(|_| self.target(&self.tracked_asset())).collect()
    }

    pub fn events(&self) -> broadcast::Receiver<IngestEvent> {
        self.ctx.event_bus.subscribe()
    }
}

/// Everything currently buffered on `rx`
pub fn drain(rx: &mut broadcast::Receiver<IngestEvent>) -> Vec<IngestEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

pub fn event_bus() -> EventBus {
    EventBus::new(64)
}

/// Settings with a poll interval long enough that the timer never fires mid-test
pub fn manual_poll_settings() -> IngestSettings {
    IngestSettings {
        poll_interval: Duration::from_secs(3600),
        ..IngestSettings::default()
    }
}
