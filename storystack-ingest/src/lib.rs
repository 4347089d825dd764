//! storystack-ingest library interface
//!
//! In-process import / auto-tag coordinator. Photos go through
//! normalization, fingerprinting and duplicate detection before anything
//! is written; accepted photos are uploaded, recorded and handed to the
//! classification service on either the immediate or the deferred batch
//! path. State changes reach the UI through the [`EventBus`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use crate::error::{IngestError, IngestResult};

use crate::config::IngestSettings;
use crate::db::AssetStore;
use crate::services::{
    AssetEditor, AssetShadow, AutoTagDispatcher, BatchPoller, ClassificationService, Clock,
    ImageNormalizer, ImportPipeline, StatusReconciler, SystemClock, TaggingRegistry,
};
use crate::storage::BlobStore;
use std::sync::Arc;
use storystack_common::EventBus;

/// Session-wide wiring of the ingest core
///
/// Built once per session. The tagging registry and the poll registry
/// are the only process-wide mutable state and both live here, so tests
/// can build isolated instances.
#[derive(Clone)]
pub struct IngestContext {
    pub store: Arc<dyn AssetStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub classifier: Arc<dyn ClassificationService>,
    pub event_bus: EventBus,
    pub registry: Arc<TaggingRegistry>,
    pub shadow: Arc<AssetShadow>,
    pub reconciler: Arc<StatusReconciler>,
    pub poller: BatchPoller,
    pub dispatcher: Arc<AutoTagDispatcher>,
    pub pipeline: Arc<ImportPipeline>,
    pub editor: Arc<AssetEditor>,
}

impl IngestContext {
    pub fn new(
        settings: &IngestSettings,
        store: Arc<dyn AssetStore>,
        blobs: Arc<dyn BlobStore>,
        classifier: Arc<dyn ClassificationService>,
    ) -> Self {
        Self::with_clock(settings, store, blobs, classifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: &IngestSettings,
        store: Arc<dyn AssetStore>,
        blobs: Arc<dyn BlobStore>,
        classifier: Arc<dyn ClassificationService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let event_bus = EventBus::new(settings.event_capacity);
        let registry = Arc::new(TaggingRegistry::new());
        let shadow = Arc::new(AssetShadow::new());

        let reconciler = Arc::new(StatusReconciler::new(
            store.clone(),
            registry.clone(),
            shadow.clone(),
            event_bus.clone(),
        ));

        let poller = BatchPoller::new(
            classifier.clone(),
            reconciler.clone(),
            event_bus.clone(),
            clock,
            settings.poll_interval,
            settings.max_poll_attempts,
        );

        let dispatcher = Arc::new(AutoTagDispatcher::new(
            classifier.clone(),
            registry.clone(),
            reconciler.clone(),
            poller.clone(),
            event_bus.clone(),
            settings.immediate_threshold,
        ));

        let pipeline = Arc::new(ImportPipeline::new(
            store.clone(),
            blobs.clone(),
            ImageNormalizer::new(settings.max_upload_bytes),
            dispatcher.clone(),
            shadow.clone(),
            event_bus.clone(),
            settings.upload_concurrency,
        ));

        let editor = Arc::new(AssetEditor::new(store.clone(), shadow.clone(), event_bus.clone()));

        Self {
            store,
            blobs,
            classifier,
            event_bus,
            registry,
            shadow,
            reconciler,
            poller,
            dispatcher,
            pipeline,
            editor,
        }
    }
}
