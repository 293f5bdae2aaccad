//! TripNest HTTP API
//!
//! Axum server exposing cache resources, mutations and the page-level views
//! over HTTP. Runs alongside the Unix socket IPC server (port configurable).
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, Value)`, so the logic is testable without axum.
//!
//! Endpoints:
//! - GET  /health           : store, auth and cache status
//! - GET  /version          : server version info
//! - GET  /resources/*key   : settled cache entry for a resource key
//! - POST /refetch/*key     : re-issue the fetch for a resource key
//! - POST /invoke           : run a mutation
//! - GET  /itineraries      : dashboard list (`search`, `filter` query params)
//! - GET  /itineraries/:id  : itinerary with activities grouped by day
//! - GET  /wishlist         : signed-in user's wishlist
//! - GET  /discover         : enriched discover feed

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tripnest_core::ipc::{Mutation, TripnestRequest, TripnestResponse};
use tripnest_core::{ErrorKind, TripnestError};

use crate::context::AppContext;
use crate::router;
use crate::subsystems::cache::CacheStatus;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub ctx: AppContext,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/resources/*key", get(resource_handler))
        .route("/refetch/*key", post(refetch_handler))
        .route("/invoke", post(invoke_handler))
        .route("/itineraries", get(itineraries_handler))
        .route("/itineraries/:id", get(itinerary_detail_handler))
        .route("/wishlist", get(wishlist_handler))
        .route("/discover", get(discover_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(ctx: AppContext, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.http.host, ctx.config.http.port);
    let state = Arc::new(HttpState { ctx });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("TripNest HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ItinerariesQuery {
    pub search: Option<String>,
    pub filter: Option<String>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(ctx: &AppContext) -> (StatusCode, Value) {
    match router::health(ctx).await {
        Ok(mut body) => {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
                obj.insert("socket".to_string(), json!(ctx.config.service.socket_path));
            }
            (StatusCode::OK, body)
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "tripnest/1",
    })
}

/// Settled cache entry. A failed fetch answers with the entry and the status
/// matching its error kind.
pub async fn resource_inner(ctx: &AppContext, key: &str) -> (StatusCode, Value) {
    entry_to_http(router::resource(ctx, key).await)
}

pub async fn refetch_inner(ctx: &AppContext, key: &str) -> (StatusCode, Value) {
    entry_to_http(router::refetch(ctx, key).await)
}

pub async fn invoke_inner(ctx: &AppContext, mutation: Mutation) -> (StatusCode, Value) {
    dispatch(ctx, TripnestRequest::Invoke { mutation }).await
}

pub async fn itineraries_inner(ctx: &AppContext, query: ItinerariesQuery) -> (StatusCode, Value) {
    dispatch(
        ctx,
        TripnestRequest::Itineraries {
            search: query.search,
            filter: query.filter,
        },
    )
    .await
}

pub async fn itinerary_detail_inner(ctx: &AppContext, id: String) -> (StatusCode, Value) {
    dispatch(ctx, TripnestRequest::ItineraryDetail { id }).await
}

pub async fn wishlist_inner(ctx: &AppContext) -> (StatusCode, Value) {
    dispatch(ctx, TripnestRequest::Wishlist).await
}

pub async fn discover_inner(ctx: &AppContext) -> (StatusCode, Value) {
    dispatch(ctx, TripnestRequest::Discover).await
}

async fn dispatch(ctx: &AppContext, request: TripnestRequest) -> (StatusCode, Value) {
    match response_to_http(router::handle_request(request, ctx).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(err) => err,
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.ctx).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn resource_handler(
    State(state): State<Arc<HttpState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let (status, body) = resource_inner(&state.ctx, &key).await;
    (status, Json(body))
}

pub async fn refetch_handler(
    State(state): State<Arc<HttpState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let (status, body) = refetch_inner(&state.ctx, &key).await;
    (status, Json(body))
}

pub async fn invoke_handler(
    State(state): State<Arc<HttpState>>,
    Json(mutation): Json<Mutation>,
) -> impl IntoResponse {
    let (status, body) = invoke_inner(&state.ctx, mutation).await;
    (status, Json(body))
}

pub async fn itineraries_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<ItinerariesQuery>,
) -> impl IntoResponse {
    let (status, body) = itineraries_inner(&state.ctx, query).await;
    (status, Json(body))
}

pub async fn itinerary_detail_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = itinerary_detail_inner(&state.ctx, id).await;
    (status, Json(body))
}

pub async fn wishlist_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = wishlist_inner(&state.ctx).await;
    (status, Json(body))
}

pub async fn discover_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = discover_inner(&state.ctx).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited | ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Network | ErrorKind::Upload => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(message: impl Into<String>, kind: ErrorKind) -> Value {
    json!({
        "error": message.into(),
        "kind": kind,
        "status": "error",
    })
}

/// Convert an IPC `TripnestResponse` into an HTTP body value, or a status
/// and error body chosen by the error kind.
pub fn response_to_http(response: TripnestResponse) -> std::result::Result<Value, (StatusCode, Value)> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(json!({})))
    } else {
        let kind = response.error_kind.unwrap_or(ErrorKind::Internal);
        let message = response.error.unwrap_or_else(|| "unknown error".to_string());
        Err((status_for(kind), error_body(message, kind)))
    }
}

fn entry_to_http(
    result: std::result::Result<crate::subsystems::cache::CacheEntry, TripnestError>,
) -> (StatusCode, Value) {
    match result {
        Ok(entry) => {
            let status = match (&entry.status, &entry.error) {
                (CacheStatus::Error, Some(info)) => status_for(info.kind),
                _ => StatusCode::OK,
            };
            match serde_json::to_value(&entry) {
                Ok(body) => (status, body),
                Err(e) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body(e.to_string(), ErrorKind::Internal),
                ),
            }
        }
        Err(e) => (status_for(e.kind()), error_body(e.to_string(), e.kind())),
    }
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: version_inner is pure and returns correct fields
    // ========================================================================
    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "tripnest/1");
    }

    // ========================================================================
    // TEST 2: response_to_http: ok response extracts data
    // ========================================================================
    #[test]
    fn test_response_to_http_ok() {
        let resp = TripnestResponse::ok(json!({"photos": [], "count": 0}));
        let data = response_to_http(resp).unwrap();
        assert_eq!(data["count"], 0);
    }

    // ========================================================================
    // TEST 3: response_to_http: error kind picks the status code
    // ========================================================================
    #[test]
    fn test_response_to_http_maps_kind_to_status() {
        let resp = TripnestResponse::from_error(&TripnestError::PermissionDenied(
            "sign in required".to_string(),
        ));
        let (status, body) = response_to_http(resp).unwrap_err();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "permission_denied");
        assert_eq!(body["status"], "error");
    }

    // ========================================================================
    // TEST 4: response_to_http: error with no message or kind falls back
    // ========================================================================
    #[test]
    fn test_response_to_http_error_fallbacks() {
        let mut resp = TripnestResponse::err("x");
        resp.error = None;
        resp.error_kind = None;
        let (status, body) = response_to_http(resp).unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "unknown error");
    }

    // ========================================================================
    // TEST 5: status_for covers the quota and upstream kinds
    // ========================================================================
    #[test]
    fn test_status_for_upstream_kinds() {
        assert_eq!(status_for(ErrorKind::QuotaExceeded), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::Upload), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
    }
}
