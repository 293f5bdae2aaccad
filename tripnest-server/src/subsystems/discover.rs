//! Discover feed and enrichment pipeline
//!
//! Stage 1 fetches a batch of photos; stage 2 enriches every photo with a
//! generated description and category. Stage 2 is best effort: a failed call
//! degrades that photo to its alt text and the fallback category, so a batch
//! only fails when stage 1 does. Output keeps stage-1 order.
//!
//! The first batch is the cached `discover-photos` resource. "Load more"
//! batches are appended in the order they were requested, even when a later
//! batch finishes first, and are dropped whenever the first batch is fetched
//! again.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tripnest_core::config::DiscoveryConfig;
use tripnest_core::models::{Category, DiscoveryPhoto, WishlistEntry};
use tripnest_core::{PhotoSource, TextEnricher, TripnestResult};

use super::keys::ResourceKey;
use crate::context::AppContext;

/// Run `transform` over `items` with at most `concurrency` in flight and
/// return the results in input order once all of them have completed.
pub async fn enrich_ordered<T, F, Fut>(items: Vec<T>, concurrency: usize, transform: F) -> Vec<T>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(items)
        .map(transform)
        .buffered(concurrency.max(1))
        .collect()
        .await
}

// ============================================================================
// EnrichmentPipeline
// ============================================================================

pub struct EnrichmentPipeline {
    photos: Arc<dyn PhotoSource>,
    enricher: Arc<dyn TextEnricher>,
    query: String,
    batch_size: u32,
    concurrency: usize,
    fallback: Category,
}

impl EnrichmentPipeline {
    pub fn new(
        photos: Arc<dyn PhotoSource>,
        enricher: Arc<dyn TextEnricher>,
        config: &DiscoveryConfig,
        fallback: Category,
    ) -> Self {
        Self {
            photos,
            enricher,
            query: config.query.clone(),
            batch_size: config.batch_size,
            concurrency: config.enrich_concurrency,
            fallback,
        }
    }

    pub async fn run_batch(&self) -> TripnestResult<Vec<DiscoveryPhoto>> {
        let photos = self
            .photos
            .fetch_random_photos(&self.query, self.batch_size)
            .await?;
        tracing::debug!(
            source = self.photos.name(),
            count = photos.len(),
            "Fetched photo batch, enriching"
        );

        let fallback = self.fallback;
        let enricher = &self.enricher;
        let enriched = enrich_ordered(photos, self.concurrency, |photo| async move {
            enricher.enrich_photo(photo, fallback).await
        })
        .await;
        Ok(enriched)
    }
}

// ============================================================================
// DiscoverFeed
// ============================================================================

#[derive(Default)]
struct FeedState {
    /// Bumped on every reset; batches from an older epoch are dropped.
    epoch: u64,
    next_ticket: u64,
    next_publish: u64,
    pending: BTreeMap<u64, Vec<DiscoveryPhoto>>,
    appended: Vec<DiscoveryPhoto>,
}

pub struct DiscoverFeed {
    pipeline: Arc<EnrichmentPipeline>,
    state: Mutex<FeedState>,
}

impl DiscoverFeed {
    pub fn new(pipeline: Arc<EnrichmentPipeline>) -> Self {
        Self {
            pipeline,
            state: Mutex::new(FeedState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every appended and in-flight batch.
    pub fn reset(&self) {
        let mut state = self.lock();
        let epoch = state.epoch + 1;
        *state = FeedState {
            epoch,
            ..FeedState::default()
        };
    }

    pub async fn first_batch(&self) -> TripnestResult<Vec<DiscoveryPhoto>> {
        self.pipeline.run_batch().await
    }

    /// Fetch and enrich one more batch. It is published after every batch
    /// requested before it; a failed batch publishes nothing but still
    /// releases the batches queued behind it.
    pub async fn load_more(&self) -> TripnestResult<Vec<DiscoveryPhoto>> {
        let (epoch, ticket) = {
            let mut state = self.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            (state.epoch, ticket)
        };

        let result = self.pipeline.run_batch().await;
        let batch = result.as_ref().map(Vec::clone).unwrap_or_default();
        if !self.publish(epoch, ticket, batch) {
            tracing::debug!(ticket, "Feed was reset, dropping load-more batch");
        }
        result
    }

    fn publish(&self, epoch: u64, ticket: u64, batch: Vec<DiscoveryPhoto>) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.epoch != epoch {
            return false;
        }
        state.pending.insert(ticket, batch);
        while let Some(ready) = state.pending.remove(&state.next_publish) {
            state.appended.extend(ready);
            state.next_publish += 1;
        }
        true
    }

    /// Published "load more" photos, in request order.
    pub fn appended(&self) -> Vec<DiscoveryPhoto> {
        self.lock().appended.clone()
    }

    /// Batches requested but not yet published.
    pub fn in_flight(&self) -> u64 {
        let state = self.lock();
        state.next_ticket - state.next_publish
    }
}

// ============================================================================
// Discover page operations
// ============================================================================

/// First batch plus every published "load more" batch.
pub async fn page(ctx: &AppContext) -> TripnestResult<Value> {
    let entry = ctx
        .cache
        .subscribe(&ResourceKey::discover_photos())
        .settled()
        .await?;
    let last_fetched_at = entry.last_fetched_at;
    let mut photos: Vec<DiscoveryPhoto> = entry.into_result()?;
    photos.extend(ctx.discover.appended());

    let wishlist_ids: Vec<String> = match ctx.auth.current_user() {
        Some(user) => super::wishlist::entries(ctx, &user.uid)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect(),
        None => Vec::new(),
    };

    Ok(json!({
        "photos": photos,
        "count": photos.len(),
        "loadingMore": ctx.discover.in_flight() > 0,
        "lastFetchedAt": last_fetched_at,
        "wishlistIds": wishlist_ids,
    }))
}

pub async fn load_more(ctx: &AppContext) -> TripnestResult<Value> {
    let batch = ctx.discover.load_more().await?;
    Ok(json!({ "added": batch.len(), "photos": batch }))
}

/// Look a photo up in the feed currently on screen.
pub fn find_photo(ctx: &AppContext, id: &str) -> Option<DiscoveryPhoto> {
    let first: Vec<DiscoveryPhoto> = ctx
        .cache
        .get(&ResourceKey::discover_photos())
        .decode()
        .ok()
        .flatten()
        .unwrap_or_default();
    first
        .into_iter()
        .chain(ctx.discover.appended())
        .find(|p| p.id == id)
}

/// Wishlist entry for a photo in the current feed.
pub fn entry_for(ctx: &AppContext, photo_id: &str) -> Option<WishlistEntry> {
    find_photo(ctx, photo_id).map(|p| WishlistEntry::from_photo(&p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enrich_ordered_keeps_input_order() {
        let items: Vec<u64> = (1..=6).collect();
        // Earlier items sleep longer so they finish last.
        let out = enrich_ordered(items, 6, |n| async move {
            tokio::time::sleep(Duration::from_millis(60 - n * 10)).await;
            n * 10
        })
        .await;
        assert_eq!(out, vec![10, 20, 30, 40, 50, 60]);
    }

    #[tokio::test]
    async fn test_enrich_ordered_zero_concurrency_still_runs() {
        let out = enrich_ordered(vec![1, 2, 3], 0, |n| async move { n + 1 }).await;
        assert_eq!(out, vec![2, 3, 4]);
    }
}
