//! Fetcher
//!
//! One asynchronous read per resource key. `ResourceFetcher` routes each tag to
//! the collaborator that owns it and decodes documents into explicit models
//! before they reach the cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tripnest_core::document::StoreError;
use tripnest_core::models::activity::activities_collection;
use tripnest_core::models::itinerary::ITINERARIES;
use tripnest_core::models::wishlist::WISHLISTS;
use tripnest_core::models::{Activity, Itinerary, Wishlist};
use tripnest_core::{
    AuthProvider, CollectionPath, DocPath, DocumentStore, QueryFilter, TripnestError,
    TripnestResult,
};

use super::discover::DiscoverFeed;
use super::keys::{self, ResourceKey};

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &ResourceKey) -> TripnestResult<Value>;
}

pub struct ResourceFetcher {
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    discover: Arc<DiscoverFeed>,
}

impl ResourceFetcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        discover: Arc<DiscoverFeed>,
    ) -> Self {
        Self {
            store,
            auth,
            discover,
        }
    }

    fn signed_in_uid(&self) -> TripnestResult<String> {
        self.auth
            .current_user()
            .map(|u| u.uid)
            .ok_or_else(|| TripnestError::PermissionDenied("sign in required".to_string()))
    }

    async fn itineraries(&self, uid: &str) -> TripnestResult<Value> {
        let docs = self
            .store
            .query(
                &CollectionPath::new(ITINERARIES),
                &QueryFilter::new().where_eq("userId", uid),
            )
            .await?;

        // A malformed document is dropped from the list rather than failing it.
        let itineraries: Vec<Itinerary> = docs
            .iter()
            .filter_map(|doc| Itinerary::from_document(doc).ok())
            .collect();
        tracing::debug!(uid, count = itineraries.len(), "Fetched itineraries");
        to_json(&itineraries)
    }

    /// Loads an itinerary and checks it belongs to the signed-in user.
    async fn owned_itinerary(&self, id: &str) -> TripnestResult<Itinerary> {
        let uid = self.signed_in_uid()?;
        let doc = self
            .store
            .get_document(&DocPath::new(ITINERARIES, id))
            .await?;
        let itinerary = Itinerary::from_document(&doc)?;
        if itinerary.owner_id != uid {
            return Err(TripnestError::PermissionDenied(format!(
                "itinerary {} belongs to another user",
                id
            )));
        }
        Ok(itinerary)
    }

    async fn activities(&self, itinerary_id: &str) -> TripnestResult<Value> {
        self.owned_itinerary(itinerary_id).await?;
        let docs = self
            .store
            .query(
                &activities_collection(itinerary_id),
                &QueryFilter::new().order_by("date").order_by("time"),
            )
            .await?;
        let activities: Vec<Activity> = docs
            .iter()
            .filter_map(|doc| Activity::from_document(itinerary_id, doc).ok())
            .collect();
        to_json(&activities)
    }

    async fn wishlist(&self, uid: &str) -> TripnestResult<Value> {
        let wishlist = match self.store.get_document(&DocPath::new(WISHLISTS, uid)).await {
            Ok(doc) => Wishlist::from_document(&doc)?,
            Err(StoreError::NotFound(_)) => Wishlist::default(),
            Err(e) => return Err(e.into()),
        };
        to_json(&wishlist.photos)
    }

    async fn discover_photos(&self) -> TripnestResult<Value> {
        // Only a successful first batch starts a new feed; a failure keeps
        // the "load more" pages already on screen.
        let photos = self.discover.first_batch().await?;
        self.discover.reset();
        to_json(&photos)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> TripnestResult<Value> {
    serde_json::to_value(value).map_err(|e| TripnestError::Other(e.to_string()))
}

fn require_param<'a>(key: &'a ResourceKey) -> TripnestResult<&'a str> {
    key.param(0)
        .ok_or_else(|| TripnestError::Validation(format!("{} is missing its parameter", key)))
}

#[async_trait]
impl Fetcher for ResourceFetcher {
    async fn fetch(&self, key: &ResourceKey) -> TripnestResult<Value> {
        match key.tag() {
            keys::USER => to_json(&self.auth.current_user()),
            keys::ITINERARIES => self.itineraries(require_param(key)?).await,
            keys::ITINERARY => to_json(&self.owned_itinerary(require_param(key)?).await?),
            keys::ACTIVITIES => self.activities(require_param(key)?).await,
            keys::WISHLIST => self.wishlist(require_param(key)?).await,
            keys::DISCOVER_PHOTOS => self.discover_photos().await,
            other => Err(TripnestError::NotFound(format!("unknown resource type '{}'", other))),
        }
    }
}
