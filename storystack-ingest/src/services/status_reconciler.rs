//! Applies auto-tag outcomes to the store, the local copies and the
//! tagging set
//!
//! Every auto-tag status write goes through here. For each asset the
//! local copy is updated first, then the store; if the store write fails
//! the local copy is rolled back. Membership in the tagging set ends on
//! every outcome, written or not.

use crate::db::AssetStore;
use crate::error::IngestResult;
use crate::models::{AssetPatch, TagFailure};
use crate::services::asset_shadow::{write_through, AssetShadow};
use crate::services::classifier_client::TagResult;
use crate::services::tagging_registry::TaggingRegistry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use storystack_common::{AutoTagStatus, EventBus, IngestEvent};
use uuid::Uuid;

/// Result of one asset's tag attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TagOutcome {
    Tagged(Vec<String>),
    Failed(TagFailure),
}

/// What happened to each asset in a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    pub completed: Vec<Uuid>,
    pub failed: Vec<Uuid>,
    /// Not in the tagging set any more; outcome dropped
    pub stale: Vec<Uuid>,
    /// Outcome could not be persisted
    pub write_errors: Vec<Uuid>,
}

impl ReconcileSummary {
    pub fn merge(&mut self, other: ReconcileSummary) {
        self.completed.extend(other.completed);
        self.failed.extend(other.failed);
        self.stale.extend(other.stale);
        self.write_errors.extend(other.write_errors);
    }
}

pub struct StatusReconciler {
    store: Arc<dyn AssetStore>,
    registry: Arc<TaggingRegistry>,
    shadow: Arc<AssetShadow>,
    event_bus: EventBus,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn AssetStore>,
        registry: Arc<TaggingRegistry>,
        shadow: Arc<AssetShadow>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            registry,
            shadow,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<TaggingRegistry> {
        &self.registry
    }

    /// Move an admitted asset to `pending` ahead of the network request
    pub async fn begin_pending(&self, asset_id: Uuid, current: AutoTagStatus) -> IngestResult<()> {
        current.transition_to(AutoTagStatus::Pending)?;
        let patch = AssetPatch::status(AutoTagStatus::Pending).with_batch_id(None);
        self.write_with_shadow(asset_id, &patch).await
    }

    /// Record which deferred batch the asset waits on
    ///
    /// No-op once the asset has left the tagging set, so a batch id is
    /// never written onto a settled record.
    pub async fn attach_batch(&self, asset_id: Uuid, batch_id: &str) -> IngestResult<()> {
        if !self.registry.is_tagging(asset_id) {
            tracing::debug!(asset_id = %asset_id, batch_id, "Asset no longer tagging, batch id not recorded");
            return Ok(());
        }
        let patch = AssetPatch::default().with_batch_id(Some(batch_id.to_string()));
        self.write_with_shadow(asset_id, &patch).await
    }

    /// Drop an admitted asset without a status change (it never reached pending)
    pub fn release(&self, asset_id: Uuid) {
        self.registry.finish(asset_id);
    }

    /// Apply one asset's outcome
    ///
    /// Returns the new status, or `None` when the asset is no longer in
    /// the tagging set (a late or repeated outcome).
    pub async fn apply(&self, asset_id: Uuid, outcome: TagOutcome) -> IngestResult<Option<AutoTagStatus>> {
        if !self.registry.is_tagging(asset_id) {
            tracing::debug!(asset_id = %asset_id, "Ignoring outcome for asset not being tagged");
            return Ok(None);
        }

        let (status, patch) = match &outcome {
            TagOutcome::Tagged(tags) => (
                AutoTagStatus::Completed,
                AssetPatch::status(AutoTagStatus::Completed)
                    .with_tags(clean_tags(tags))
                    .with_batch_id(None),
            ),
            TagOutcome::Failed(_) => (
                AutoTagStatus::Failed,
                AssetPatch::status(AutoTagStatus::Failed).with_batch_id(None),
            ),
        };

        if let Some(local) = self.shadow.get(asset_id) {
            if let Err(e) = local.auto_tag_status.transition_to(status) {
                self.registry.finish(asset_id);
                return Err(e.into());
            }
        }

        let written = self.write_with_shadow(asset_id, &patch).await;
        self.registry.finish(asset_id);

        if let TagOutcome::Failed(failure) = &outcome {
            if failure.is_rate_limit() {
                self.registry.suppress(asset_id);
            }
        }

        match written {
            Ok(()) => {
                match outcome {
                    TagOutcome::Tagged(_) => self.registry.clear_failure(asset_id),
                    TagOutcome::Failed(failure) => {
                        tracing::info!(asset_id = %asset_id, %failure, "Auto-tag failed");
                        self.registry.record_failure(asset_id, failure);
                    }
                }
                self.emit_finished(asset_id, status, patch.tags.unwrap_or_default());
                Ok(Some(status))
            }
            Err(e) => {
                tracing::error!(
                    asset_id = %asset_id,
                    error = %e,
                    "Could not persist auto-tag outcome; record keeps its previous status"
                );
                self.registry
                    .record_failure(asset_id, TagFailure::Persist(e.to_string()));
                let local = self.shadow.get(asset_id);
                self.emit_finished(
                    asset_id,
                    local.as_ref().map_or(AutoTagStatus::Pending, |a| a.auto_tag_status),
                    local.map(|a| a.tags).unwrap_or_default(),
                );
                Err(e)
            }
        }
    }

    /// Match per-asset results to the dispatched assets
    ///
    /// An asset with no result is failed; results for assets that were
    /// not dispatched are ignored.
    pub async fn apply_results(&self, asset_ids: &[Uuid], results: Vec<TagResult>) -> ReconcileSummary {
        let mut by_asset: HashMap<Uuid, TagResult> = HashMap::with_capacity(results.len());
        for result in results {
            if !asset_ids.contains(&result.asset_id) {
                tracing::warn!(asset_id = %result.asset_id, "Result for asset that was not requested");
                continue;
            }
            by_asset.insert(result.asset_id, result);
        }

        let mut summary = ReconcileSummary::default();
        for &asset_id in asset_ids {
            let outcome = match by_asset.remove(&asset_id) {
                Some(TagResult { error: Some(err), .. }) => TagOutcome::Failed(TagFailure::from(&err)),
                Some(TagResult { tags, .. }) => TagOutcome::Tagged(tags),
                None => TagOutcome::Failed(TagFailure::MissingResult),
            };
            self.record(&mut summary, asset_id, outcome).await;
        }
        summary
    }

    /// Fail every asset with the same reason
    pub async fn fail_all(&self, asset_ids: &[Uuid], failure: TagFailure) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for &asset_id in asset_ids {
            self.record(&mut summary, asset_id, TagOutcome::Failed(failure.clone()))
                .await;
        }
        summary
    }

    async fn record(&self, summary: &mut ReconcileSummary, asset_id: Uuid, outcome: TagOutcome) {
        match self.apply(asset_id, outcome).await {
            Ok(Some(AutoTagStatus::Completed)) => summary.completed.push(asset_id),
            Ok(Some(_)) => summary.failed.push(asset_id),
            Ok(None) => summary.stale.push(asset_id),
            Err(_) => summary.write_errors.push(asset_id),
        }
    }

    async fn write_with_shadow(&self, asset_id: Uuid, patch: &AssetPatch) -> IngestResult<()> {
        write_through(&self.shadow, self.store.as_ref(), &self.event_bus, asset_id, patch).await
    }

    fn emit_finished(&self, asset_id: Uuid, status: AutoTagStatus, tags: Vec<String>) {
        self.event_bus.emit_lossy(IngestEvent::TaggingFinished {
            asset_id,
            status,
            tags,
            timestamp: Utc::now(),
        });
    }
}

/// Trimmed, non-empty, first occurrence wins
pub fn clean_tags(tags: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !cleaned.iter().any(|t| t == tag) {
            cleaned.push(tag.to_string());
        }
    }
    cleaned
}
