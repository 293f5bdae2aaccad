//! Document store abstraction.
//!
//! Collections are addressed Firestore-style: `itineraries`, `itineraries/{id}/activities`.
//! A document is a JSON object plus its id. Backends:
//! - **memory**: `tokio::sync::RwLock` maps, for development and tests
//! - **postgres**: a single JSONB `documents` table via sqlx

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::TripnestError;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryDocumentStore;
pub use postgres::PgDocumentStore;

// ============================================================================
// Paths
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn child(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        CollectionPath::new(collection).child(id)
    }

    /// Sub-collection nested under this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection, self.id, name))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

// ============================================================================
// Documents and queries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Decode into a typed schema, exposing the document id as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut data = self.data.clone();
        if let Some(obj) = data.as_object_mut() {
            obj.insert("id".to_string(), Value::String(self.id.clone()));
        }
        serde_json::from_value(data)
    }
}

/// Equality filters plus ordering, applied in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub equals: Vec<(String, Value)>,
    pub order_by: Vec<String>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(field.into());
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| data.get(field) == Some(expected))
    }

    pub fn sort(&self, docs: &mut [Document]) {
        if self.order_by.is_empty() {
            return;
        }
        docs.sort_by(|a, b| {
            for field in &self.order_by {
                let ord = compare_values(a.data.get(field), b.data.get(field));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });
    }
}

/// Missing/null sorts first, then booleans, numbers, strings.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Shallow merge of top-level fields, as `set(..., merge)` and `update` do.
pub(crate) fn merge_fields(target: &mut Value, fields: &Map<String, Value>) {
    match target.as_object_mut() {
        Some(obj) => {
            for (k, v) in fields {
                obj.insert(k.clone(), v.clone());
            }
        }
        None => *target = Value::Object(fields.clone()),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for TripnestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => TripnestError::NotFound(m),
            StoreError::PermissionDenied(m) => TripnestError::PermissionDenied(m),
            StoreError::Unavailable(m) => TripnestError::Network(m),
            StoreError::Malformed(m) => TripnestError::NotFound(m),
            StoreError::Database(e) => TripnestError::Database(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Atomic read-modify-write callback. Receives the current body (if any) and
/// returns the body to store.
pub type DocumentModifier = Box<dyn FnOnce(Option<Value>) -> StoreResult<Value> + Send>;

// ============================================================================
// Store trait
// ============================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &DocPath) -> StoreResult<Document>;

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: &QueryFilter,
    ) -> StoreResult<Vec<Document>>;

    /// Insert under a generated id.
    async fn add_document(&self, collection: &CollectionPath, data: Value) -> StoreResult<DocPath>;

    async fn set_document(&self, path: &DocPath, data: Value, merge: bool) -> StoreResult<()>;

    /// Partial update; fails with `NotFound` when the document does not exist.
    async fn update_document(&self, path: &DocPath, fields: Map<String, Value>) -> StoreResult<()>;

    /// Deleting a missing document succeeds.
    async fn delete_document(&self, path: &DocPath) -> StoreResult<()>;

    /// All-or-nothing delete of several documents.
    async fn batch_delete(&self, paths: &[DocPath]) -> StoreResult<()>;

    async fn modify_document(&self, path: &DocPath, modify: DocumentModifier)
        -> StoreResult<Value>;

    /// Returns a backend version string.
    async fn health_check(&self) -> StoreResult<String>;

    fn backend_name(&self) -> &'static str;
}

pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_collection_paths() {
        let parent = DocPath::new("itineraries", "abc");
        let acts = parent.collection("activities");
        assert_eq!(acts.as_str(), "itineraries/abc/activities");
        assert_eq!(acts.child("x").to_string(), "itineraries/abc/activities/x");
    }

    #[test]
    fn test_filter_matches_and_sorts_by_multiple_fields() {
        let filter = QueryFilter::new()
            .where_eq("kind", "a")
            .order_by("date")
            .order_by("time");
        assert!(filter.matches(&json!({"kind": "a"})));
        assert!(!filter.matches(&json!({"kind": "b"})));
        assert!(!filter.matches(&json!({})));

        let mut docs = vec![
            Document::new("3", json!({"date": "2026-01-02", "time": "08:00"})),
            Document::new("2", json!({"date": "2026-01-01", "time": "12:00"})),
            Document::new("1", json!({"date": "2026-01-01", "time": "09:00"})),
        ];
        filter.sort(&mut docs);
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_decode_injects_id() {
        #[derive(Deserialize)]
        struct Row {
            id: String,
            name: String,
        }
        let doc = Document::new("d1", json!({"name": "n"}));
        let row: Row = doc.decode().unwrap();
        assert_eq!(row.id, "d1");
        assert_eq!(row.name, "n");
    }
}
