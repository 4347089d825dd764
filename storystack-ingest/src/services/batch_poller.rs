//! Deferred batch polling
//!
//! The poll registry holds one [`PollEntry`] per outstanding batch id.
//! A single timer polls every entry each interval. It starts when the
//! first batch is registered and stops itself once the registry is
//! empty, so an idle session runs no background work.

use crate::models::{PollEntry, TagFailure};
use crate::services::classifier_client::{BatchStatus, ClassificationService, PollResponse, TagResult};
use crate::services::status_reconciler::{ReconcileSummary, StatusReconciler};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use storystack_common::events::BatchResolution;
use storystack_common::{EventBus, IngestEvent};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Source of registration timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Batch ids by what one poll pass did with them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollTickReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub evicted: Vec<String>,
    pub pending: Vec<String>,
    /// Poll request itself failed; entry kept for the next pass
    pub errored: Vec<String>,
}

struct TimerHandle {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct PollState {
    entries: HashMap<String, PollEntry>,
    timer: Option<TimerHandle>,
    generation: u64,
}

struct PollerInner {
    classifier: Arc<dyn ClassificationService>,
    reconciler: Arc<StatusReconciler>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_attempts: u32,
    state: Mutex<PollState>,
    outstanding: watch::Sender<usize>,
}

/// Cloneable handle to the session's poll registry
#[derive(Clone)]
pub struct BatchPoller {
    inner: Arc<PollerInner>,
}

impl BatchPoller {
    pub fn new(
        classifier: Arc<dyn ClassificationService>,
        reconciler: Arc<StatusReconciler>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(PollerInner {
                classifier,
                reconciler,
                event_bus,
                clock,
                interval,
                max_attempts: max_attempts.max(1),
                state: Mutex::new(PollState::default()),
                outstanding,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a batch to the registry and make sure the timer runs
    ///
    /// Registering a batch id that is already outstanding merges the asset
    /// ids into the existing entry. Returns true for a new entry.
    pub fn register(&self, batch_id: String, asset_ids: Vec<Uuid>) -> bool {
        let (inserted, asset_count, outstanding) = {
            let mut state = self.lock();
            let inserted = match state.entries.get_mut(&batch_id) {
                Some(entry) => {
                    entry.merge_assets(asset_ids);
                    false
                }
                None => {
                    let entry = PollEntry::new(batch_id.clone(), asset_ids, self.inner.clock.now());
                    state.entries.insert(batch_id.clone(), entry);
                    true
                }
            };
            let asset_count = state.entries.get(&batch_id).map_or(0, |e| e.asset_ids.len());
            (inserted, asset_count, state.entries.len())
        };
        self.inner.outstanding.send_replace(outstanding);

        if inserted {
            tracing::info!(batch_id = %batch_id, asset_count, "Deferred batch registered");
            self.inner.event_bus.emit_lossy(IngestEvent::BatchRegistered {
                batch_id,
                asset_count,
                timestamp: Utc::now(),
            });
        } else {
            tracing::debug!(batch_id = %batch_id, asset_count, "Merged assets into outstanding batch");
        }

        self.start();
        inserted
    }

    pub fn contains(&self, batch_id: &str) -> bool {
        self.lock().entries.contains_key(batch_id)
    }

    /// Outstanding entries, oldest first
    pub fn entries(&self) -> Vec<PollEntry> {
        let mut entries: Vec<PollEntry> = self.lock().entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.lock().timer.is_some()
    }

    /// Number of outstanding batches, updated on every registry change
    pub fn outstanding(&self) -> watch::Receiver<usize> {
        self.inner.outstanding.subscribe()
    }

    /// Resolves once no batch is outstanding
    pub async fn wait_until_idle(&self) {
        let mut rx = self.outstanding();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Start the timer if entries exist and it is not already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let (generation, cancel) = {
            let mut state = self.lock();
            if state.timer.is_some() || state.entries.is_empty() {
                return;
            }
            state.generation += 1;
            let cancel = CancellationToken::new();
            state.timer = Some(TimerHandle {
                generation: state.generation,
                cancel: cancel.clone(),
            });
            (state.generation, cancel)
        };

        tracing::debug!(generation, interval = ?self.inner.interval, "Poll timer started");
        let poller = self.clone();
        tokio::spawn(async move { poller.run_timer(generation, cancel).await });
    }

    /// Stop the timer; outstanding entries stay registered
    pub fn stop(&self) {
        if let Some(handle) = self.lock().timer.take() {
            handle.cancel.cancel();
            tracing::debug!(generation = handle.generation, "Poll timer stopped");
        }
    }

    async fn run_timer(self, generation: u64, cancel: CancellationToken) {
        let period = self.inner.interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                    if self.release_timer_if_idle(generation) {
                        break;
                    }
                }
            }
        }
    }

    /// True when this timer generation should exit
    fn release_timer_if_idle(&self, generation: u64) -> bool {
        let mut state = self.lock();
        match &state.timer {
            Some(handle) if handle.generation == generation => {
                if state.entries.is_empty() {
                    state.timer = None;
                    tracing::debug!(generation, "Poll registry empty, timer stopped");
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    /// Poll every outstanding batch once
    ///
    /// Works from a snapshot of the registry; batches registered during
    /// the pass are picked up next time. One batch's failure does not
    /// affect the others.
    pub async fn poll_once(&self) -> PollTickReport {
        let snapshot = self.entries();
        let mut report = PollTickReport::default();

        for entry in snapshot {
            match self.inner.classifier.poll(&entry.batch_id).await {
                Ok(PollResponse {
                    status: BatchStatus::Completed,
                    results,
                }) => {
                    let summary = self
                        .settle(
                            &entry,
                            Settlement::Results(results.unwrap_or_default()),
                            BatchResolution::Completed,
                        )
                        .await;
                    tracing::info!(
                        batch_id = %entry.batch_id,
                        completed = summary.completed.len(),
                        failed = summary.failed.len(),
                        "Deferred batch completed"
                    );
                    report.completed.push(entry.batch_id);
                }
                Ok(PollResponse {
                    status: BatchStatus::Failed,
                    ..
                }) => {
                    tracing::warn!(batch_id = %entry.batch_id, "Deferred batch failed");
                    self.settle(
                        &entry,
                        Settlement::Fail(TagFailure::BatchFailed),
                        BatchResolution::Failed,
                    )
                    .await;
                    report.failed.push(entry.batch_id);
                }
                Ok(PollResponse {
                    status: BatchStatus::Pending,
                    ..
                }) => {
                    if self.count_attempt(&entry).await {
                        report.evicted.push(entry.batch_id);
                    } else {
                        report.pending.push(entry.batch_id);
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!(batch_id = %entry.batch_id, error = %e, "Batch poll failed, will retry");
                    } else {
                        tracing::error!(batch_id = %entry.batch_id, error = %e, "Batch poll rejected by service");
                    }
                    if self.count_attempt(&entry).await {
                        report.evicted.push(entry.batch_id);
                    } else {
                        report.errored.push(entry.batch_id);
                    }
                }
            }
        }

        report
    }

    /// Count an unresolved poll; evicts at the ceiling. True if evicted.
    async fn count_attempt(&self, entry: &PollEntry) -> bool {
        let attempts = {
            let mut state = self.lock();
            match state.entries.get_mut(&entry.batch_id) {
                Some(current) => {
                    current.attempt_count += 1;
                    current.attempt_count
                }
                None => return false,
            }
        };

        if attempts < self.inner.max_attempts {
            return false;
        }

        tracing::warn!(
            batch_id = %entry.batch_id,
            attempts,
            "Deferred batch still pending at poll ceiling, giving up"
        );
        self.settle(
            entry,
            Settlement::Fail(TagFailure::PollExhausted(attempts)),
            BatchResolution::Evicted,
        )
        .await;
        true
    }

    /// Apply a batch outcome to every asset in the entry, then drop it
    ///
    /// Assets merged into the entry while the outcome was being applied
    /// get the same outcome before the entry is removed; removal happens
    /// under the lock only once no unsettled asset remains.
    async fn settle(
        &self,
        entry: &PollEntry,
        settlement: Settlement,
        resolution: BatchResolution,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut settled: HashSet<Uuid> = HashSet::with_capacity(entry.asset_ids.len());
        let mut batch = entry.asset_ids.clone();

        loop {
            let part = match &settlement {
                Settlement::Results(results) => {
                    let results = results
                        .iter()
                        .filter(|r| batch.contains(&r.asset_id))
                        .cloned()
                        .collect();
                    self.inner.reconciler.apply_results(&batch, results).await
                }
                Settlement::Fail(failure) => self.inner.reconciler.fail_all(&batch, failure.clone()).await,
            };
            summary.merge(part);
            settled.extend(batch.iter().copied());

            let (late, outstanding) = {
                let mut state = self.lock();
                let late: Vec<Uuid> = match state.entries.get(&entry.batch_id) {
                    Some(current) => current
                        .asset_ids
                        .iter()
                        .copied()
                        .filter(|id| !settled.contains(id))
                        .collect(),
                    None => return summary,
                };
                if late.is_empty() {
                    state.entries.remove(&entry.batch_id);
                }
                (late, state.entries.len())
            };

            if late.is_empty() {
                self.inner.outstanding.send_replace(outstanding);
                self.inner.event_bus.emit_lossy(IngestEvent::BatchResolved {
                    batch_id: entry.batch_id.clone(),
                    resolution,
                    timestamp: Utc::now(),
                });
                return summary;
            }

            tracing::debug!(
                batch_id = %entry.batch_id,
                count = late.len(),
                "Settling assets merged into batch during the poll"
            );
            batch = late;
        }
    }
}

/// Outcome shared by every asset of a resolved batch
enum Settlement {
    Results(Vec<TagResult>),
    Fail(TagFailure),
}
