//! Auto-tag dispatch
//!
//! Admits assets into the tagging set, moves them to `pending`, then
//! sends one request on the immediate or deferred path depending on how
//! many were admitted. Immediate results are reconciled right away;
//! deferred batch ids are handed to the [`BatchPoller`].

use crate::models::{DispatchPath, TagFailure, TagTarget, TagTrigger};
use crate::services::batch_poller::BatchPoller;
use crate::services::classifier_client::{
    ClassificationService, DispatchMode, DispatchOutcome, DispatchResponse, TagRequestItem,
};
use crate::services::status_reconciler::{ReconcileSummary, StatusReconciler};
use crate::services::tagging_registry::TaggingRegistry;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use storystack_common::{AutoTagStatus, EventBus, IngestEvent, TransitionError};
use uuid::Uuid;

/// What a dispatch call did with each requested asset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// `None` when nothing was sent
    pub path: Option<DispatchPath>,
    pub dispatched: Vec<Uuid>,
    /// Already being tagged; no second request sent
    pub collapsed: Vec<Uuid>,
    /// Skipped on an automatic trigger after a rate-limit failure
    pub suppressed: Vec<Uuid>,
    pub rejected: Vec<(Uuid, TransitionError)>,
    /// `pending` could not be written; never sent
    pub not_started: Vec<Uuid>,
    pub batch_id: Option<String>,
    /// Outcomes applied during this call (immediate path or request failure)
    pub reconciled: ReconcileSummary,
}

pub struct AutoTagDispatcher {
    classifier: Arc<dyn ClassificationService>,
    registry: Arc<TaggingRegistry>,
    reconciler: Arc<StatusReconciler>,
    poller: BatchPoller,
    event_bus: EventBus,
    immediate_threshold: usize,
}

impl AutoTagDispatcher {
    pub fn new(
        classifier: Arc<dyn ClassificationService>,
        registry: Arc<TaggingRegistry>,
        reconciler: Arc<StatusReconciler>,
        poller: BatchPoller,
        event_bus: EventBus,
        immediate_threshold: usize,
    ) -> Self {
        Self {
            classifier,
            registry,
            reconciler,
            poller,
            event_bus,
            immediate_threshold,
        }
    }

    pub async fn dispatch(&self, targets: Vec<TagTarget>, trigger: TagTrigger) -> DispatchReport {
        let mut report = DispatchReport::default();
        let admitted = self.admit(targets, trigger, &mut report);

        let mut accepted = Vec::with_capacity(admitted.len());
        for target in admitted {
            match self
                .reconciler
                .begin_pending(target.asset_id, target.current_status)
                .await
            {
                Ok(()) => accepted.push(target),
                Err(e) => {
                    tracing::warn!(asset_id = %target.asset_id, error = %e, "Could not mark asset pending");
                    self.reconciler.release(target.asset_id);
                    report.not_started.push(target.asset_id);
                }
            }
        }

        if accepted.is_empty() {
            return report;
        }

        let asset_ids: Vec<Uuid> = accepted.iter().map(|t| t.asset_id).collect();
        let items: Vec<TagRequestItem> = accepted
            .into_iter()
            .map(|t| TagRequestItem {
                asset_id: t.asset_id,
                image_url: t.image_url,
            })
            .collect();

        let path = DispatchPath::for_count(items.len(), self.immediate_threshold);
        let mode = match path {
            DispatchPath::Immediate => DispatchMode::Immediate,
            DispatchPath::Deferred => DispatchMode::Deferred,
        };
        report.path = Some(path);
        report.dispatched = asset_ids.clone();

        self.event_bus.emit_lossy(IngestEvent::TaggingStarted {
            asset_ids: asset_ids.clone(),
            batch_id: None,
            timestamp: Utc::now(),
        });
        tracing::info!(count = items.len(), ?path, "Dispatching auto-tag request");

        let outcome = self
            .classifier
            .classify(&items, mode)
            .await
            .and_then(DispatchResponse::into_outcome);

        match outcome {
            Ok(DispatchOutcome::Results(results)) => {
                report.reconciled = self.reconciler.apply_results(&asset_ids, results).await;
            }
            Ok(DispatchOutcome::Deferred(batch_id)) => {
                // Batch ids are written before the poller can resolve the batch
                for &asset_id in &asset_ids {
                    if let Err(e) = self.reconciler.attach_batch(asset_id, &batch_id).await {
                        tracing::warn!(asset_id = %asset_id, batch_id = %batch_id, error = %e, "Could not record batch id");
                    }
                }
                self.event_bus.emit_lossy(IngestEvent::TaggingStarted {
                    asset_ids: asset_ids.clone(),
                    batch_id: Some(batch_id.clone()),
                    timestamp: Utc::now(),
                });
                self.poller.register(batch_id.clone(), asset_ids);
                report.batch_id = Some(batch_id);
            }
            Err(e) => {
                if e.is_rate_limit() {
                    tracing::warn!(count = asset_ids.len(), "Auto-tag request rate limited");
                } else {
                    tracing::warn!(count = asset_ids.len(), error = %e, "Auto-tag request failed");
                }
                report.reconciled = self
                    .reconciler
                    .fail_all(&asset_ids, TagFailure::from(&e))
                    .await;
            }
        }

        report
    }

    /// Filter targets down to those admitted into the tagging set
    fn admit(&self, targets: Vec<TagTarget>, trigger: TagTrigger, report: &mut DispatchReport) -> Vec<TagTarget> {
        let mut seen = HashSet::with_capacity(targets.len());
        let mut admitted = Vec::with_capacity(targets.len());

        for target in targets {
            let asset_id = target.asset_id;
            if !seen.insert(asset_id) || self.registry.is_tagging(asset_id) {
                report.collapsed.push(asset_id);
                continue;
            }
            if trigger == TagTrigger::Automatic && self.registry.is_suppressed(asset_id) {
                report.suppressed.push(asset_id);
                continue;
            }
            if let Err(e) = target.current_status.transition_to(AutoTagStatus::Pending) {
                tracing::debug!(asset_id = %asset_id, error = %e, "Asset cannot be tagged from its current status");
                report.rejected.push((asset_id, e));
                continue;
            }
            if !self.registry.try_begin(asset_id) {
                report.collapsed.push(asset_id);
                continue;
            }
            if trigger == TagTrigger::User {
                self.registry.clear_suppression(asset_id);
            }
            admitted.push(target);
        }

        admitted
    }
}
