//! Photo import pipeline
//!
//! Two phases. `prepare` normalizes and fingerprints every pick and runs
//! one duplicate lookup; nothing is written. `commit` uploads and records
//! the photos the user's duplicate decision keeps, then hands the new
//! records to the dispatcher. A photo that fails at any stage is reported
//! and skipped; the rest of the import carries on.

use crate::db::AssetStore;
use crate::models::{
    Asset, DuplicateDecision, FailureStage, ImportBatch, ImportProgress, ItemFailure, NewAsset,
    PreparedImage, ProgressSnapshot, RawPick, TagTarget, TagTrigger,
};
use crate::services::asset_shadow::AssetShadow;
use crate::services::auto_tag_dispatcher::{AutoTagDispatcher, DispatchReport};
use crate::services::duplicate_detector::DuplicateDetector;
use crate::services::fingerprinter::Fingerprinter;
use crate::services::image_normalizer::ImageNormalizer;
use crate::storage::{asset_storage_path, BlobStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use storystack_common::{Error, EventBus, IngestEvent};
use uuid::Uuid;

/// Message shown when any photo in an import failed
pub const IMPORT_FAILURE_MESSAGE: &str = "Could not import one or more photos";

/// Photos picked for one collection
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub owner_id: Uuid,
    pub collection_id: Uuid,
    pub picks: Vec<RawPick>,
}

/// Final state of an import session
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub session_id: Uuid,
    /// Created records in pick order, as currently held locally
    pub created: Vec<Asset>,
    /// Pick indices whose content already existed for the owner
    pub duplicates: Vec<usize>,
    /// Pick indices left out by a skip-duplicates decision
    pub skipped_duplicates: Vec<usize>,
    pub failures: Vec<ItemFailure>,
    pub dispatch: Option<DispatchReport>,
    /// At least one record was written without its fingerprint
    pub degraded: bool,
    pub cancelled: bool,
    pub progress: ProgressSnapshot,
}

impl ImportReport {
    /// User-facing failure message, if any photo failed
    pub fn user_summary(&self) -> Option<&'static str> {
        if self.failures.is_empty() {
            None
        } else {
            Some(IMPORT_FAILURE_MESSAGE)
        }
    }
}

/// Result of [`ImportPipeline::run`]
#[derive(Debug)]
pub enum ImportStage {
    Finished(ImportReport),
    /// Duplicates found; call [`ImportPipeline::commit`] with the user's decision
    AwaitingDecision(ImportBatch),
}

pub struct ImportPipeline {
    store: Arc<dyn AssetStore>,
    blobs: Arc<dyn BlobStore>,
    detector: DuplicateDetector,
    normalizer: ImageNormalizer,
    fingerprinter: Fingerprinter,
    dispatcher: Arc<AutoTagDispatcher>,
    shadow: Arc<AssetShadow>,
    event_bus: EventBus,
    concurrency: usize,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn AssetStore>,
        blobs: Arc<dyn BlobStore>,
        normalizer: ImageNormalizer,
        dispatcher: Arc<AutoTagDispatcher>,
        shadow: Arc<AssetShadow>,
        event_bus: EventBus,
        concurrency: usize,
    ) -> Self {
        Self {
            detector: DuplicateDetector::new(store.clone()),
            store,
            blobs,
            normalizer,
            fingerprinter: Fingerprinter::new(),
            dispatcher,
            shadow,
            event_bus,
            concurrency: concurrency.max(1),
        }
    }

    /// Prepare, then commit straight away unless duplicates need a decision
    pub async fn run(&self, request: ImportRequest) -> ImportStage {
        let batch = self.prepare(request).await;
        if batch.has_duplicates() {
            ImportStage::AwaitingDecision(batch)
        } else {
            ImportStage::Finished(self.commit(batch, DuplicateDecision::ProceedAll).await)
        }
    }

    /// Prepare and commit, applying `on_duplicates` only if duplicates exist
    pub async fn import(&self, request: ImportRequest, on_duplicates: DuplicateDecision) -> ImportReport {
        match self.run(request).await {
            ImportStage::Finished(report) => report,
            ImportStage::AwaitingDecision(batch) => self.commit(batch, on_duplicates).await,
        }
    }

    /// Normalize, fingerprint and check for duplicates; writes nothing
    pub async fn prepare(&self, request: ImportRequest) -> ImportBatch {
        let ImportRequest {
            owner_id,
            collection_id,
            picks,
        } = request;

        let session_id = Uuid::new_v4();
        let progress = ImportProgress::new(session_id, picks.len(), self.event_bus.clone());
        progress.publish();
        tracing::info!(session_id = %session_id, total = picks.len(), "Import started");

        let prepared: Vec<Result<PreparedImage, ItemFailure>> = stream::iter(picks.into_iter().enumerate())
            .map(|(pick_index, pick)| {
                let normalizer = self.normalizer;
                let fingerprinter = self.fingerprinter;
                let progress = progress.clone();
                async move {
                    let prepared = prepare_one(normalizer, fingerprinter, pick_index, pick).await;
                    // Failed picks count too, so processed reaches total
                    progress.inc_processed();
                    prepared
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut items = Vec::with_capacity(prepared.len());
        let mut failures = Vec::new();
        for result in prepared {
            match result {
                Ok(item) => items.push(item),
                Err(failure) => failures.push(failure),
            }
        }

        let candidates: Vec<Option<String>> = items.iter().map(|i| i.fingerprint.clone()).collect();
        let duplicate_indices: Vec<usize> = self
            .detector
            .find_duplicates(owner_id, &candidates)
            .await
            .into_iter()
            .map(|i| items[i].pick_index)
            .collect();

        if !duplicate_indices.is_empty() {
            tracing::info!(
                session_id = %session_id,
                duplicates = duplicate_indices.len(),
                "Duplicates found, waiting for decision"
            );
            self.event_bus.emit_lossy(IngestEvent::DuplicatesFound {
                session_id,
                duplicate_indices: duplicate_indices.clone(),
                timestamp: Utc::now(),
            });
        }

        ImportBatch {
            session_id,
            owner_id,
            collection_id,
            items,
            failures,
            duplicate_indices,
            progress,
        }
    }

    /// Upload and record according to `decision`, then auto-tag the new records
    pub async fn commit(&self, batch: ImportBatch, decision: DuplicateDecision) -> ImportReport {
        let ImportBatch {
            session_id,
            owner_id,
            collection_id,
            items,
            mut failures,
            duplicate_indices,
            progress,
        } = batch;

        if decision == DuplicateDecision::Cancel {
            tracing::info!(session_id = %session_id, "Import cancelled at duplicate prompt");
            self.emit_finished(session_id, 0, failures.len(), true);
            return ImportReport {
                session_id,
                created: Vec::new(),
                duplicates: duplicate_indices,
                skipped_duplicates: Vec::new(),
                failures,
                dispatch: None,
                degraded: false,
                cancelled: true,
                progress: progress.snapshot(),
            };
        }

        let (to_import, skipped): (Vec<PreparedImage>, Vec<PreparedImage>) =
            items.into_iter().partition(|item| {
                decision == DuplicateDecision::ProceedAll
                    || !duplicate_indices.contains(&item.pick_index)
            });
        let skipped_duplicates: Vec<usize> = skipped.iter().map(|i| i.pick_index).collect();

        let results: Vec<Result<(usize, Asset, bool), ItemFailure>> = stream::iter(to_import)
            .map(|item| self.import_one(owner_id, collection_id, item, &progress))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut created = Vec::with_capacity(results.len());
        let mut degraded = false;
        for result in results {
            match result {
                Ok((pick_index, asset, without_fingerprint)) => {
                    degraded |= without_fingerprint;
                    created.push((pick_index, asset));
                }
                Err(failure) => failures.push(failure),
            }
        }
        created.sort_by_key(|(pick_index, _)| *pick_index);
        failures.sort_by_key(|f| f.pick_index);

        let targets: Vec<TagTarget> = created
            .iter()
            .map(|(_, asset)| TagTarget {
                asset_id: asset.id,
                image_url: self.blobs.public_url(&asset.storage_path),
                current_status: asset.auto_tag_status,
            })
            .collect();
        let dispatch = if targets.is_empty() {
            None
        } else {
            Some(self.dispatcher.dispatch(targets, TagTrigger::Automatic).await)
        };

        let created: Vec<Asset> = created
            .into_iter()
            .map(|(_, asset)| self.shadow.get(asset.id).unwrap_or(asset))
            .collect();

        if !failures.is_empty() {
            tracing::warn!(
                session_id = %session_id,
                failed = failures.len(),
                "{}",
                IMPORT_FAILURE_MESSAGE
            );
        }
        tracing::info!(
            session_id = %session_id,
            imported = created.len(),
            skipped = skipped_duplicates.len(),
            failed = failures.len(),
            "Import finished"
        );
        self.emit_finished(session_id, created.len(), failures.len(), false);

        ImportReport {
            session_id,
            created,
            duplicates: duplicate_indices,
            skipped_duplicates,
            failures,
            dispatch,
            degraded,
            cancelled: false,
            progress: progress.snapshot(),
        }
    }

    /// Upload and record one photo; the bool is true if the fingerprint was dropped
    async fn import_one(
        &self,
        owner_id: Uuid,
        collection_id: Uuid,
        item: PreparedImage,
        progress: &ImportProgress,
    ) -> Result<(usize, Asset, bool), ItemFailure> {
        let failure = |stage: FailureStage, message: String| ItemFailure {
            pick_index: item.pick_index,
            name: item.name.clone(),
            stage,
            message,
        };

        let path = asset_storage_path(owner_id, collection_id, item.extension);
        if let Err(e) = self.blobs.upload(&path, item.bytes, item.content_type).await {
            tracing::warn!(name = %item.name, error = %e, "Upload failed");
            return Err(failure(FailureStage::Upload, e.to_string()));
        }

        let new_asset = NewAsset::imported(owner_id, collection_id, path, item.fingerprint.clone());
        let (asset, without_fingerprint) = match self.store.create_asset(&new_asset).await {
            Ok(asset) => (asset, false),
            Err(Error::SchemaDrift { table, column }) if new_asset.content_fingerprint.is_some() => {
                tracing::warn!(
                    %table,
                    %column,
                    "Store rejected fingerprint; recording without it (degraded, duplicate detection unavailable)"
                );
                match self.store.create_asset(&new_asset.without_fingerprint()).await {
                    Ok(asset) => (asset, true),
                    Err(e) => {
                        tracing::warn!(name = %item.name, error = %e, "Record creation failed, blob left orphaned");
                        return Err(failure(FailureStage::Record, e.to_string()));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(name = %item.name, error = %e, "Record creation failed, blob left orphaned");
                return Err(failure(FailureStage::Record, e.to_string()));
            }
        };

        progress.inc_imported();
        self.shadow.track(asset.clone());
        Ok((item.pick_index, asset, without_fingerprint))
    }

    fn emit_finished(&self, session_id: Uuid, imported: usize, failed: usize, cancelled: bool) {
        self.event_bus.emit_lossy(IngestEvent::ImportFinished {
            session_id,
            imported,
            failed,
            cancelled,
            timestamp: Utc::now(),
        });
    }
}

async fn prepare_one(
    normalizer: ImageNormalizer,
    fingerprinter: Fingerprinter,
    pick_index: usize,
    pick: RawPick,
) -> Result<PreparedImage, ItemFailure> {
    let RawPick { name, bytes } = pick;

    let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(&bytes))
        .await
        .map_err(|e| e.to_string())
        .and_then(|result| result.map_err(|e| e.to_string()));

    let image = match normalized {
        Ok(image) => image,
        Err(message) => {
            tracing::warn!(name = %name, error = %message, "Could not normalize photo");
            return Err(ItemFailure {
                pick_index,
                name,
                stage: FailureStage::Normalize,
                message,
            });
        }
    };
    let content_type = image.content_type();
    let extension = image.extension();

    let shared = Arc::new(image.bytes);
    let fingerprint = fingerprinter.try_fingerprint(shared.clone()).await;
    let bytes = Arc::try_unwrap(shared).unwrap_or_else(|shared| shared.as_ref().clone());

    Ok(PreparedImage {
        pick_index,
        name,
        bytes,
        content_type,
        extension,
        fingerprint,
    })
}
