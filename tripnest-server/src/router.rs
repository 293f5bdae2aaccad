use serde_json::{json, Value};
use tripnest_core::ipc::{Mutation, TripnestRequest, TripnestResponse};
use tripnest_core::models::{ItineraryFilter, TypeFilter};
use tripnest_core::{TripnestError, TripnestResult};

use crate::context::AppContext;
use crate::subsystems::cache::CacheEntry;
use crate::subsystems::keys::ResourceKey;
use crate::subsystems::mutator::{self, MutationState};
use crate::subsystems::{discover, itineraries, wishlist};

pub async fn handle_request(request: TripnestRequest, ctx: &AppContext) -> TripnestResponse {
    match request {
        TripnestRequest::Ping => TripnestResponse::pong(),
        TripnestRequest::Health => respond(health(ctx).await),
        TripnestRequest::Get { key } => respond(resource(ctx, &key).await.and_then(entry_json)),
        // A single snapshot; the IPC server streams watches itself.
        TripnestRequest::Watch { key } => respond(
            key.parse::<ResourceKey>()
                .and_then(|k| ctx.subscribe_checked(&k))
                .and_then(|sub| entry_json(sub.current())),
        ),
        TripnestRequest::Refetch { key } => {
            respond(refetch(ctx, &key).await.and_then(entry_json))
        }
        TripnestRequest::Invoke { mutation } => respond(invoke(ctx, mutation).await),
        TripnestRequest::Itineraries { search, filter } => {
            let result = match parse_filter(search, filter) {
                Ok(f) => itineraries::list(ctx, &f).await,
                Err(e) => Err(e),
            };
            respond(result)
        }
        TripnestRequest::ItineraryDetail { id } => respond(itineraries::detail(ctx, &id).await),
        TripnestRequest::Wishlist => respond(wishlist::list(ctx).await),
        TripnestRequest::Discover => respond(discover::page(ctx).await),
    }
}

fn respond(result: TripnestResult<Value>) -> TripnestResponse {
    match result {
        Ok(data) => TripnestResponse::ok(data),
        Err(e) => TripnestResponse::from_error(&e),
    }
}

fn entry_json(entry: CacheEntry) -> TripnestResult<Value> {
    serde_json::to_value(entry).map_err(|e| TripnestError::Other(e.to_string()))
}

pub fn parse_filter(search: Option<String>, filter: Option<String>) -> TripnestResult<ItineraryFilter> {
    let type_filter = match filter.as_deref() {
        Some(f) => f.parse::<TypeFilter>()?,
        None => TypeFilter::All,
    };
    Ok(ItineraryFilter::new(search.unwrap_or_default(), type_filter))
}

/// Settled entry for a textual resource key. A failed fetch still returns
/// its entry; only a rejected key is an error.
pub async fn resource(ctx: &AppContext, key: &str) -> TripnestResult<CacheEntry> {
    let key: ResourceKey = key.parse()?;
    ctx.subscribe_checked(&key)?.settled().await
}

/// Re-issue the fetch for a key and wait for the new result.
pub async fn refetch(ctx: &AppContext, key: &str) -> TripnestResult<CacheEntry> {
    let key: ResourceKey = key.parse()?;
    let mut sub = ctx.subscribe_checked(&key)?;
    let started = ctx.cache.refetch(&key);
    tracing::debug!(key = %key, started, "Refetch requested");
    sub.settled().await
}

/// Run a mutation to completion and report its final state.
pub async fn invoke(ctx: &AppContext, mutation: Mutation) -> TripnestResult<Value> {
    let mut handle = mutator::invoke(ctx, mutation);
    let id = handle.id();
    let name = handle.name();
    match handle.wait().await {
        MutationState::Success { value } => Ok(json!({
            "id": id,
            "mutation": name,
            "status": "success",
            "value": value,
        })),
        MutationState::Error { error } => Err(error.into()),
        MutationState::Pending => Err(TripnestError::Other(format!(
            "mutation {} did not complete",
            name
        ))),
    }
}

pub async fn health(ctx: &AppContext) -> TripnestResult<Value> {
    let store_version = ctx.store.health_check().await?;
    let stats = ctx.cache.stats();
    Ok(json!({
        "status": "healthy",
        "store": ctx.store.backend_name(),
        "store_version": store_version,
        "auth": ctx.auth.name(),
        "signed_in": ctx.auth.current_user().is_some(),
        "uploader": ctx.uploader.name(),
        "cache": stats,
    }))
}
