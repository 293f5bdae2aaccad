//! Discover feed: two-stage enrichment, ordered "load more" publication,
//! freshness and reset behaviour.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tripnest_core::models::{Category, DiscoveryPhoto};
use tripnest_core::{
    ErrorKind, FallbackEnricher, InMemoryAuthProvider, InMemoryDocumentStore, TripnestConfig,
    UnsplashClient,
};
use tripnest_server::subsystems::cache::CacheStatus;
use tripnest_server::subsystems::discover;
use tripnest_server::{router, AppContext};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{batch, harness};

fn photos_of(page: &serde_json::Value) -> Vec<DiscoveryPhoto> {
    serde_json::from_value(page["photos"].clone()).unwrap()
}

fn ids(photos: &[DiscoveryPhoto]) -> Vec<String> {
    photos.iter().map(|p| p.id.clone()).collect()
}

// ===========================================================================
// TEST 1: 8 photos with 3 failed enrichments publish 8, 3 with fallbacks
// ===========================================================================
#[tokio::test]
async fn test_partial_enrichment_failure_degrades_per_item() {
    let h = harness();
    h.photos.push(batch("p", 8));
    h.enricher.fail_for(&["p2", "p5", "p7"]);

    let page = discover::page(&h.ctx).await.unwrap();
    let photos = photos_of(&page);
    assert_eq!(page["count"], 8);
    assert_eq!(
        ids(&photos),
        (1..=8).map(|i| format!("p{}", i)).collect::<Vec<_>>()
    );
    assert_eq!(h.enricher.calls(), 8);

    let fallbacks: Vec<&DiscoveryPhoto> = photos
        .iter()
        .filter(|p| p.category == Some(Category::General))
        .collect();
    let fallback_ids: Vec<&str> = fallbacks.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(fallback_ids, vec!["p2", "p5", "p7"]);
    for p in &fallbacks {
        assert_eq!(p.description, p.alt_description);
    }
    assert_eq!(photos[0].description.as_deref(), Some("About Place p1"));
}

// ===========================================================================
// TEST 2: concurrent "load more" batches publish in request order
// ===========================================================================
#[tokio::test]
async fn test_load_more_publishes_in_issue_order() {
    let h = harness();
    h.photos.push(batch("a", 2));
    discover::page(&h.ctx).await.unwrap();

    let release_b = h.photos.push_gated(batch("b", 2));
    let release_c = h.photos.push_gated(batch("c", 2));

    let ctx1 = h.ctx.clone();
    let first = tokio::spawn(async move { discover::load_more(&ctx1).await });
    let ctx2 = h.ctx.clone();
    let second = tokio::spawn(async move { discover::load_more(&ctx2).await });

    while h.photos.calls() < 3 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.ctx.discover.in_flight(), 2);

    // The later batch finishes first but must wait for the earlier one.
    release_c.send(()).unwrap();
    let second_out = second.await.unwrap().unwrap();
    assert_eq!(second_out["added"], 2);
    assert!(h.ctx.discover.appended().is_empty());
    let page = discover::page(&h.ctx).await.unwrap();
    assert_eq!(page["loadingMore"], true);

    release_b.send(()).unwrap();
    first.await.unwrap().unwrap();

    let page = discover::page(&h.ctx).await.unwrap();
    assert_eq!(
        ids(&photos_of(&page)),
        vec!["a1", "a2", "b1", "b2", "c1", "c2"]
    );
    assert_eq!(page["loadingMore"], false);
}

// ===========================================================================
// TEST 3: a failed "load more" does not hold back the batches behind it
// ===========================================================================
#[tokio::test]
async fn test_failed_load_more_releases_later_batches() {
    let h = harness();
    h.photos.push(batch("a", 1));
    discover::page(&h.ctx).await.unwrap();

    h.photos.push_failure();
    h.photos.push(batch("c", 1));

    let err = discover::load_more(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    discover::load_more(&h.ctx).await.unwrap();

    let page = discover::page(&h.ctx).await.unwrap();
    assert_eq!(ids(&photos_of(&page)), vec!["a1", "c1"]);
}

// ===========================================================================
// TEST 4: re-fetching the first batch drops the appended pages
// ===========================================================================
#[tokio::test]
async fn test_refetch_resets_appended_batches() {
    let h = harness();
    h.photos.push(batch("a", 2));
    discover::page(&h.ctx).await.unwrap();
    h.photos.push(batch("b", 2));
    discover::load_more(&h.ctx).await.unwrap();
    assert_eq!(h.ctx.discover.appended().len(), 2);

    h.photos.push(batch("n", 2));
    let entry = router::refetch(&h.ctx, "discover-photos").await.unwrap();
    assert!(entry.is_settled());

    let page = discover::page(&h.ctx).await.unwrap();
    assert_eq!(ids(&photos_of(&page)), vec!["n1", "n2"]);
    assert!(h.ctx.discover.appended().is_empty());
}

// ===========================================================================
// TEST 5: a failed re-fetch keeps the pages already loaded
// ===========================================================================
#[tokio::test]
async fn test_failed_refetch_keeps_appended_batches() {
    let h = harness();
    h.photos.push(batch("a", 2));
    discover::page(&h.ctx).await.unwrap();
    h.photos.push(batch("b", 2));
    discover::load_more(&h.ctx).await.unwrap();

    h.photos.push_failure();
    let entry = router::refetch(&h.ctx, "discover-photos").await.unwrap();
    assert_eq!(entry.status, CacheStatus::Error);
    assert_eq!(entry.error.unwrap().kind, ErrorKind::RateLimited);
    assert_eq!(ids(&h.ctx.discover.appended()), vec!["b1", "b2"]);
}

// ===========================================================================
// TEST 6: stage-1 failure is cached as an error; the next read retries
// ===========================================================================
#[tokio::test]
async fn test_photo_source_failure_then_retry() {
    let h = harness();
    h.photos.push_failure();

    let err = discover::page(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert_eq!(h.enricher.calls(), 0);

    h.photos.push(batch("r", 3));
    let page = discover::page(&h.ctx).await.unwrap();
    assert_eq!(page["count"], 3);
    assert_eq!(h.photos.calls(), 2);
}

// ===========================================================================
// TEST 7: the first batch stays fresh for the configured window
// ===========================================================================
#[tokio::test(start_paused = true)]
async fn test_first_batch_goes_stale_after_window() {
    let mut config = TripnestConfig::default();
    config.discovery.stale_minutes = 60;
    let h = common::harness_with(config);

    discover::page(&h.ctx).await.unwrap();
    discover::page(&h.ctx).await.unwrap();
    assert_eq!(h.photos.calls(), 1);

    tokio::time::advance(Duration::from_secs(59 * 60)).await;
    discover::page(&h.ctx).await.unwrap();
    assert_eq!(h.photos.calls(), 1);

    tokio::time::advance(Duration::from_secs(2 * 60)).await;
    discover::page(&h.ctx).await.unwrap();
    assert_eq!(h.photos.calls(), 2);
}

// ===========================================================================
// TEST 8: real Unsplash client with enrichment disabled falls back per photo
// ===========================================================================
#[tokio::test]
async fn test_unsplash_feed_without_enrichment_key() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photos/random"))
        .and(query_param("query", "travel-destination"))
        .and(query_param("count", "8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "u1",
                "urls": { "regular": "https://img/u1" },
                "alt_description": "terraced vineyard",
                "location": { "name": "Douro Valley" }
            },
            {
                "id": "u2",
                "urls": { "regular": "https://img/u2" },
                "alt_description": "night market",
                "location": null
            }
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TripnestConfig::default();
    let photos = UnsplashClient::new(
        Some("test-key".to_string()),
        mock_server.uri(),
        config.discovery.orientation.clone(),
    )
    .unwrap();
    let ctx = AppContext::new(
        config,
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(InMemoryAuthProvider::new()),
        Arc::new(photos),
        Arc::new(FallbackEnricher::new(None)),
        Arc::new(tripnest_core::DisabledUploader),
    );

    let page = discover::page(&ctx).await.unwrap();
    let photos = photos_of(&page);
    assert_eq!(ids(&photos), vec!["u1", "u2"]);
    assert_eq!(photos[0].description.as_deref(), Some("terraced vineyard"));
    assert_eq!(
        photos[1].category,
        Some(Category::General)
    );
    // Signed out: no wishlist lookup.
    assert_eq!(page["wishlistIds"], serde_json::json!([]));
}
