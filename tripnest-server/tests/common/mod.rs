//! Shared fakes for the coordinator integration tests.
//!
//! Everything runs against the in-memory document store and auth provider;
//! the photo source, enricher and uploader are scripted so tests can control
//! ordering and failures.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tripnest_core::document::{DocumentModifier, StoreError, StoreResult};
use tripnest_core::models::{Credentials, DiscoveryPhoto};
use tripnest_core::{
    AuthProvider, CollectionPath, DocPath, Document, DocumentStore, Enrichment, EnrichmentError,
    InMemoryAuthProvider, InMemoryDocumentStore, ObjectUploader, PhotoError, PhotoSource,
    QueryFilter, TextEnricher, TripnestConfig, UploadError, UploadFile,
};
use tripnest_core::models::Category;
use tripnest_server::AppContext;

// ============================================================================
// Photos
// ============================================================================

pub fn photo(id: &str) -> DiscoveryPhoto {
    DiscoveryPhoto {
        id: id.to_string(),
        url: format!("https://img.test/{}", id),
        alt_description: Some(format!("alt {}", id)),
        location: Some(format!("Place {}", id)),
        description: None,
        category: None,
    }
}

pub fn batch(prefix: &str, n: usize) -> Vec<DiscoveryPhoto> {
    (1..=n).map(|i| photo(&format!("{}{}", prefix, i))).collect()
}

struct Script {
    result: Result<Vec<DiscoveryPhoto>, ()>,
    gate: Option<oneshot::Receiver<()>>,
}

/// Photo source that replays queued batches. A gated batch does not return
/// until its gate is released. With the queue empty it serves `auto` photos.
#[derive(Default)]
pub struct ScriptedPhotoSource {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl ScriptedPhotoSource {
    pub fn push(&self, photos: Vec<DiscoveryPhoto>) {
        self.lock().push_back(Script {
            result: Ok(photos),
            gate: None,
        });
    }

    /// Queue a batch held back until the returned sender fires.
    pub fn push_gated(&self, photos: Vec<DiscoveryPhoto>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().push_back(Script {
            result: Ok(photos),
            gate: Some(rx),
        });
        tx
    }

    pub fn push_failure(&self) {
        self.lock().push_back(Script {
            result: Err(()),
            gate: None,
        });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Script>> {
        self.scripts.lock().unwrap()
    }
}

#[async_trait]
impl PhotoSource for ScriptedPhotoSource {
    async fn fetch_random_photos(
        &self,
        _query: &str,
        count: u32,
    ) -> Result<Vec<DiscoveryPhoto>, PhotoError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.lock().pop_front();
        match script {
            Some(Script { result, gate }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                result.map_err(|_| PhotoError::RateLimited)
            }
            None => Ok(batch(&format!("auto{}-", n), count as usize)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Enricher
// ============================================================================

/// Describes every photo as "About <place>", except the ones listed as failing.
#[derive(Default)]
pub struct SelectiveEnricher {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl SelectiveEnricher {
    pub fn fail_for(&self, photo_ids: &[&str]) {
        let mut failing = self.failing.lock().unwrap();
        failing.extend(photo_ids.iter().map(|id| format!("\"Place {}\"", id)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextEnricher for SelectiveEnricher {
    async fn generate_description(&self, prompt: &str) -> Result<Enrichment, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fails = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|marker| prompt.contains(marker.as_str()));
        if fails {
            return Err(EnrichmentError::QuotaExceeded("scripted".to_string()));
        }
        let place = prompt.split('"').nth(1).unwrap_or("somewhere");
        Ok(Enrichment {
            description: format!("About {}", place),
            category: Category::Cultural,
        })
    }

    fn name(&self) -> &str {
        "selective"
    }
}

// ============================================================================
// Document store
// ============================================================================

/// In-memory store that counts partial updates and can fail batch deletes.
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: InMemoryDocumentStore,
    pub fail_batch_delete: AtomicBool,
    updates: AtomicUsize,
    queries: AtomicUsize,
}

impl InstrumentedStore {
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InstrumentedStore {
    async fn get_document(&self, path: &DocPath) -> StoreResult<Document> {
        self.inner.get_document(path).await
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: &QueryFilter,
    ) -> StoreResult<Vec<Document>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(collection, filter).await
    }

    async fn add_document(&self, collection: &CollectionPath, data: Value) -> StoreResult<DocPath> {
        self.inner.add_document(collection, data).await
    }

    async fn set_document(&self, path: &DocPath, data: Value, merge: bool) -> StoreResult<()> {
        self.inner.set_document(path, data, merge).await
    }

    async fn update_document(&self, path: &DocPath, fields: Map<String, Value>) -> StoreResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_document(path, fields).await
    }

    async fn delete_document(&self, path: &DocPath) -> StoreResult<()> {
        self.inner.delete_document(path).await
    }

    async fn batch_delete(&self, paths: &[DocPath]) -> StoreResult<()> {
        if self.fail_batch_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("batch rejected".to_string()));
        }
        self.inner.batch_delete(paths).await
    }

    async fn modify_document(&self, path: &DocPath, modify: DocumentModifier) -> StoreResult<Value> {
        self.inner.modify_document(path, modify).await
    }

    async fn health_check(&self) -> StoreResult<String> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}

// ============================================================================
// Uploader
// ============================================================================

#[derive(Default)]
pub struct RecordingUploader {
    pub fail: AtomicBool,
    uploaded: Mutex<Vec<String>>,
}

impl RecordingUploader {
    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectUploader for RecordingUploader {
    async fn upload(&self, file: UploadFile) -> Result<String, UploadError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Rejected {
                code: 400,
                message: "scripted rejection".to_string(),
            });
        }
        self.uploaded.lock().unwrap().push(file.file_name.clone());
        Ok(format!("https://cdn.test/{}", file.file_name))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub ctx: AppContext,
    pub store: Arc<InstrumentedStore>,
    pub auth: Arc<InMemoryAuthProvider>,
    pub photos: Arc<ScriptedPhotoSource>,
    pub enricher: Arc<SelectiveEnricher>,
    pub uploader: Arc<RecordingUploader>,
}

pub fn harness() -> Harness {
    harness_with(TripnestConfig::default())
}

pub fn harness_with(config: TripnestConfig) -> Harness {
    let store = Arc::new(InstrumentedStore::default());
    let auth = Arc::new(InMemoryAuthProvider::new());
    let photos = Arc::new(ScriptedPhotoSource::default());
    let enricher = Arc::new(SelectiveEnricher::default());
    let uploader = Arc::new(RecordingUploader::default());

    let ctx = AppContext::new(
        config,
        store.clone(),
        auth.clone(),
        photos.clone(),
        enricher.clone(),
        uploader.clone(),
    );

    Harness {
        ctx,
        store,
        auth,
        photos,
        enricher,
        uploader,
    }
}

pub fn creds(email: &str) -> Credentials {
    Credentials {
        email: email.to_string(),
        password: "secret-pass".to_string(),
    }
}

impl Harness {
    /// Register and sign in a fresh account; returns its uid.
    pub async fn sign_up(&self, email: &str) -> String {
        self.auth.sign_up(&creds(email), None).await.unwrap().uid
    }

    /// Write an itinerary document directly, bypassing the mutation path.
    pub async fn seed_itinerary(&self, owner: &str, destination: &str) -> String {
        let data = serde_json::json!({
            "title": format!("Trip to {}", destination),
            "destination": destination,
            "type": "leisure",
            "notes": "",
            "userId": owner,
            "createdAt": "2026-01-01T00:00:00Z",
            "isFavorite": false,
            "imageUrl": "",
        });
        self.store
            .inner
            .add_document(&CollectionPath::new("itineraries"), data)
            .await
            .unwrap()
            .id
    }

    pub async fn seed_activity(&self, itinerary_id: &str, date: &str, time: &str, title: &str) {
        let collection = tripnest_core::models::activity::activities_collection(itinerary_id);
        self.store
            .inner
            .add_document(
                &collection,
                serde_json::json!({ "date": date, "time": time, "title": title }),
            )
            .await
            .unwrap();
    }
}
