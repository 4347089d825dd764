//! In-memory stand-ins for the store, blob storage and classifier

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storystack_common::{AutoTagStatus, Error, Result};
use storystack_ingest::db::AssetStore;
use storystack_ingest::models::{Asset, AssetPatch, NewAsset};
use storystack_ingest::services::{
    ClassificationService, ClassifierError, Clock, DispatchMode, DispatchResponse, PollResponse,
    TagRequestItem, TagResult,
};
use storystack_ingest::storage::BlobStore;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Asset store backed by a map, with failure switches
#[derive(Default)]
pub struct MemoryAssetStore {
    assets: Mutex<HashMap<Uuid, Asset>>,
    fail_updates_for: Mutex<HashSet<Uuid>>,
    fail_all_updates: AtomicBool,
    reject_fingerprint_column: AtomicBool,
    fail_fingerprint_query: AtomicBool,
    fingerprint_queries: AtomicUsize,
    batch_write_delay: Mutex<Option<Duration>>,
}

impl MemoryAssetStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Existing record for duplicate checks
    pub fn seed(&self, owner_id: Uuid, fingerprint: Option<&str>) -> Asset {
        let asset = NewAsset::imported(
            owner_id,
            Uuid::new_v4(),
            format!("{}/seed/{}.png", owner_id, Uuid::new_v4()),
            fingerprint.map(str::to_string),
        )
        .into_asset(Uuid::new_v4(), Utc::now());
        self.insert(asset.clone());
        asset
    }

    pub fn insert(&self, asset: Asset) {
        self.assets.lock().unwrap().insert(asset.id, asset);
    }

    pub fn asset(&self, id: Uuid) -> Option<Asset> {
        self.assets.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Asset> {
        self.assets.lock().unwrap().values().cloned().collect()
    }

    pub fn fail_updates_for(&self, id: Uuid) {
        self.fail_updates_for.lock().unwrap().insert(id);
    }

    pub fn set_fail_all_updates(&self, fail: bool) {
        self.fail_all_updates.store(fail, Ordering::SeqCst);
    }

    /// Behave like a store missing the fingerprint column
    pub fn reject_fingerprint_column(&self) {
        self.reject_fingerprint_column.store(true, Ordering::SeqCst);
    }

    pub fn fail_fingerprint_query(&self) {
        self.fail_fingerprint_query.store(true, Ordering::SeqCst);
    }

    pub fn fingerprint_queries(&self) -> usize {
        self.fingerprint_queries.load(Ordering::SeqCst)
    }

    /// Writes that set a batch id sleep this long before applying
    pub fn delay_batch_writes(&self, delay: Duration) {
        *self.batch_write_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn create_asset(&self, new_asset: &NewAsset) -> Result<Asset> {
        if new_asset.content_fingerprint.is_some() && self.reject_fingerprint_column.load(Ordering::SeqCst) {
            return Err(Error::SchemaDrift {
                table: "assets".to_string(),
                column: "content_fingerprint".to_string(),
            });
        }
        let asset = new_asset.clone().into_asset(Uuid::new_v4(), Utc::now());
        self.insert(asset.clone());
        Ok(asset)
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<Asset>> {
        Ok(self.asset(id))
    }

    async fn update_asset(&self, id: Uuid, patch: &AssetPatch) -> Result<()> {
        if self.fail_all_updates.load(Ordering::SeqCst) || self.fail_updates_for.lock().unwrap().contains(&id) {
            return Err(Error::Internal("injected write failure".to_string()));
        }
        if matches!(patch.batch_id, Some(Some(_))) {
            let delay = *self.batch_write_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        let mut assets = self.assets.lock().unwrap();
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("asset {}", id)))?;
        patch.apply_to(asset);
        asset.updated_at = Utc::now();
        Ok(())
    }

    async fn existing_fingerprints(&self, owner_id: Uuid, candidates: &[String]) -> Result<HashSet<String>> {
        self.fingerprint_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_fingerprint_query.load(Ordering::SeqCst) {
            return Err(Error::Internal("injected query failure".to_string()));
        }
        let assets = self.assets.lock().unwrap();
        Ok(assets
            .values()
            .filter(|a| a.owner_id == owner_id)
            .filter_map(|a| a.content_fingerprint.clone())
            .filter(|fp| candidates.contains(fp))
            .collect())
    }

    async fn list_by_status(&self, owner_id: Uuid, status: AutoTagStatus) -> Result<Vec<Asset>> {
        let mut matching: Vec<Asset> = self
            .all()
            .into_iter()
            .filter(|a| a.owner_id == owner_id && a.auto_tag_status == status)
            .collect();
        matching.sort_by_key(|a| (a.created_at, a.id));
        Ok(matching)
    }
}

/// Blob store keeping uploads in memory
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, String)>>,
    fail_next_uploads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_uploads(&self, count: usize) {
        self.fail_next_uploads.store(count, Ordering::SeqCst);
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.blobs.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.blobs.lock().unwrap().get(path).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let should_fail = self
            .fail_next_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected upload failure",
            )));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("memory://blobs/{}", path)
    }
}

/// Deterministic tags for an asset
pub fn tags_for(asset_id: Uuid) -> Vec<String> {
    vec![format!("tag-{}", &asset_id.to_string()[..8]), "photo".to_string()]
}

/// Scriptable classification service
///
/// Without a script, immediate requests answer with [`tags_for`] each
/// asset, deferred requests get `batch-N`, and polls complete the batch.
#[derive(Default)]
pub struct FakeClassifier {
    classify_calls: Mutex<Vec<(DispatchMode, Vec<TagRequestItem>)>>,
    poll_calls: Mutex<Vec<String>>,
    dispatch_script: Mutex<VecDeque<std::result::Result<DispatchResponse, ClassifierError>>>,
    poll_scripts: Mutex<HashMap<String, VecDeque<std::result::Result<PollResponse, ClassifierError>>>>,
    batches: Mutex<HashMap<String, Vec<Uuid>>>,
    rate_limited_items: Mutex<HashSet<Uuid>>,
    batch_counter: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    poll_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_dispatch(&self, response: std::result::Result<DispatchResponse, ClassifierError>) {
        self.dispatch_script.lock().unwrap().push_back(response);
    }

    pub fn script_poll(&self, batch_id: &str, response: std::result::Result<PollResponse, ClassifierError>) {
        self.poll_scripts
            .lock()
            .unwrap()
            .entry(batch_id.to_string())
            .or_default()
            .push_back(response);
    }

    /// The next result for each of these assets carries a `rate_limited` error
    pub fn rate_limit_items(&self, ids: impl IntoIterator<Item = Uuid>) {
        self.rate_limited_items.lock().unwrap().extend(ids);
    }

    /// Block classify calls until permits are added to the returned semaphore
    pub fn hold_requests(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Block polls until permits are added to the returned semaphore
    pub fn hold_polls(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.poll_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn classify_calls(&self) -> Vec<(DispatchMode, Vec<TagRequestItem>)> {
        self.classify_calls.lock().unwrap().clone()
    }

    pub fn classify_count(&self) -> usize {
        self.classify_calls.lock().unwrap().len()
    }

    pub fn poll_calls(&self) -> Vec<String> {
        self.poll_calls.lock().unwrap().clone()
    }

    fn results_for(&self, ids: &[Uuid]) -> Vec<TagResult> {
        let mut limited = self.rate_limited_items.lock().unwrap();
        ids.iter()
            .map(|&id| {
                if limited.remove(&id) {
                    TagResult::failed(id, "rate_limited", Some("quota exceeded"))
                } else {
                    TagResult::tagged(id, tags_for(id))
                }
            })
            .collect()
    }
}

#[async_trait]
impl ClassificationService for FakeClassifier {
    async fn classify(
        &self,
        items: &[TagRequestItem],
        mode: DispatchMode,
    ) -> std::result::Result<DispatchResponse, ClassifierError> {
        self.classify_calls.lock().unwrap().push((mode, items.to_vec()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted = self.dispatch_script.lock().unwrap().pop_front();
        let response = match scripted {
            Some(response) => response?,
            None => {
                let ids: Vec<Uuid> = items.iter().map(|i| i.asset_id).collect();
                match mode {
                    DispatchMode::Immediate => DispatchResponse::immediate(self.results_for(&ids)),
                    DispatchMode::Deferred => {
                        let n = self.batch_counter.fetch_add(1, Ordering::SeqCst) + 1;
                        DispatchResponse::deferred(format!("batch-{}", n))
                    }
                }
            }
        };

        if let Some(batch_id) = &response.batch_id {
            // A repeated batch id covers the earlier items as well
            self.batches
                .lock()
                .unwrap()
                .entry(batch_id.clone())
                .or_default()
                .extend(items.iter().map(|i| i.asset_id));
        }
        Ok(response)
    }

    async fn poll(&self, batch_id: &str) -> std::result::Result<PollResponse, ClassifierError> {
        self.poll_calls.lock().unwrap().push(batch_id.to_string());

        let gate = self.poll_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted = self
            .poll_scripts
            .lock()
            .unwrap()
            .get_mut(batch_id)
            .and_then(|queue| queue.pop_front());
        if let Some(response) = scripted {
            return response;
        }

        let ids = self.batches.lock().unwrap().get(batch_id).cloned().unwrap_or_default();
        Ok(PollResponse::completed(self.results_for(&ids)))
    }
}

/// Clock returning a fixed instant
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
