//! In-memory document store.
//!
//! Not durable: all state is lost on restart. Every mutation runs under the
//! write lock, so `batch_delete` and `modify_document` are atomic with respect
//! to every other call on the same store. Deleting a document does not remove
//! its sub-collections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{
    generate_id, merge_fields, CollectionPath, DocPath, Document, DocumentModifier,
    DocumentStore, QueryFilter, StoreError, StoreResult,
};

type Collection = BTreeMap<String, Value>;

#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<CollectionPath, Collection>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection; used by tests and diagnostics.
    pub async fn count(&self, collection: &CollectionPath) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, path: &DocPath) -> StoreResult<Document> {
        let guard = self.collections.read().await;
        guard
            .get(&path.collection)
            .and_then(|c| c.get(&path.id))
            .map(|data| Document::new(path.id.clone(), data.clone()))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: &QueryFilter,
    ) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let mut docs: Vec<Document> = guard
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, data)| filter.matches(data))
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        filter.sort(&mut docs);
        Ok(docs)
    }

    async fn add_document(&self, collection: &CollectionPath, data: Value) -> StoreResult<DocPath> {
        if !data.is_object() {
            return Err(StoreError::Malformed("document body must be an object".to_string()));
        }
        let id = generate_id();
        self.collections
            .write()
            .await
            .entry(collection.clone())
            .or_default()
            .insert(id.clone(), data);
        Ok(collection.child(id))
    }

    async fn set_document(&self, path: &DocPath, data: Value, merge: bool) -> StoreResult<()> {
        let fields = match data {
            Value::Object(map) => map,
            _ => return Err(StoreError::Malformed("document body must be an object".to_string())),
        };
        let mut guard = self.collections.write().await;
        let collection = guard.entry(path.collection.clone()).or_default();
        match collection.get_mut(&path.id) {
            Some(existing) if merge => merge_fields(existing, &fields),
            _ => {
                collection.insert(path.id.clone(), Value::Object(fields));
            }
        }
        Ok(())
    }

    async fn update_document(&self, path: &DocPath, fields: Map<String, Value>) -> StoreResult<()> {
        let mut guard = self.collections.write().await;
        let existing = guard
            .get_mut(&path.collection)
            .and_then(|c| c.get_mut(&path.id))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        merge_fields(existing, &fields);
        Ok(())
    }

    async fn delete_document(&self, path: &DocPath) -> StoreResult<()> {
        if let Some(c) = self.collections.write().await.get_mut(&path.collection) {
            c.remove(&path.id);
        }
        Ok(())
    }

    async fn batch_delete(&self, paths: &[DocPath]) -> StoreResult<()> {
        let mut guard = self.collections.write().await;
        for path in paths {
            if let Some(c) = guard.get_mut(&path.collection) {
                c.remove(&path.id);
            }
        }
        Ok(())
    }

    async fn modify_document(
        &self,
        path: &DocPath,
        modify: DocumentModifier,
    ) -> StoreResult<Value> {
        let mut guard = self.collections.write().await;
        let collection = guard.entry(path.collection.clone()).or_default();
        let current = collection.get(&path.id).cloned();
        let next = modify(current)?;
        if !next.is_object() {
            return Err(StoreError::Malformed("document body must be an object".to_string()));
        }
        collection.insert(path.id.clone(), next.clone());
        Ok(next)
    }

    async fn health_check(&self) -> StoreResult<String> {
        Ok(format!("in-memory ({} collections)", self.collections.read().await.len()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
