//! Itinerary reads and writes
//!
//! Reads go through the cache (`itineraries/{uid}`, `itinerary/{id}`,
//! `activities/{id}`); writes go straight to the document store through
//! `run_mutation` so dependent keys are invalidated only after they land.

use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};
use tripnest_core::models::activity::activities_collection;
use tripnest_core::models::itinerary::ITINERARIES;
use tripnest_core::models::{
    group_by_date, Activity, Itinerary, ItineraryFilter, NewActivity, NewItinerary,
};
use tripnest_core::{CollectionPath, DocPath, QueryFilter, TripnestError, TripnestResult, UploadFile};

use super::keys::{self, KeyPattern, ResourceKey};
use super::mutator::run_mutation;
use crate::context::AppContext;

// ============================================================================
// Reads
// ============================================================================

/// Dashboard list for the signed-in user, filtered client-side.
pub async fn list(ctx: &AppContext, filter: &ItineraryFilter) -> TripnestResult<Value> {
    let uid = ctx.require_user()?.uid;
    let mut sub = ctx.subscribe_checked(&ResourceKey::itineraries(&uid))?;
    let entry = sub.settled().await?;
    let last_fetched_at = entry.last_fetched_at;
    let all: Vec<Itinerary> = entry.into_result()?;
    let shown = filter.apply(&all);

    Ok(json!({
        "itineraries": shown,
        "total": all.len(),
        "shown": shown.len(),
        "filtered": filter.is_active(),
        "lastFetchedAt": last_fetched_at,
    }))
}

/// One itinerary with its activities, ordered by (date, time) and grouped by day.
pub async fn detail(ctx: &AppContext, id: &str) -> TripnestResult<Value> {
    let mut itinerary_sub = ctx.subscribe_checked(&ResourceKey::itinerary(id))?;
    let mut activities_sub = ctx.subscribe_checked(&ResourceKey::activities(id))?;

    let (itinerary, activities) = futures::try_join!(
        itinerary_sub.value::<Itinerary>(),
        activities_sub.value::<Vec<Activity>>()
    )?;

    let days: Vec<Value> = group_by_date(&activities)
        .into_iter()
        .map(|(date, items)| json!({ "date": date, "activities": items }))
        .collect();

    Ok(json!({
        "itinerary": itinerary,
        "activities": activities,
        "days": days,
    }))
}

// ============================================================================
// Writes
// ============================================================================

/// Loads an itinerary straight from the store and checks its owner.
async fn load_owned(ctx: &AppContext, uid: &str, id: &str) -> TripnestResult<Itinerary> {
    let doc = ctx
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

async fn upload_cover(ctx: &AppContext, image_path: &str) -> TripnestResult<String> {
    let file = UploadFile::from_path(Path::new(image_path)).await?;
    tracing::info!(
        uploader = ctx.uploader.name(),
        file = %file.file_name,
        bytes = file.bytes.len(),
        "Uploading cover image"
    );
    Ok(ctx.uploader.upload(file).await?)
}

pub async fn create(ctx: &AppContext, input: NewItinerary) -> TripnestResult<Value> {
    input.validate()?;
    let uid = ctx.require_user()?.uid;

    let write = async {
        // Upload first: a failed upload must leave nothing behind.
        let image_url = match input.image_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => upload_cover(ctx, path).await?,
            None => String::new(),
        };
        let data = input.to_document_data(&uid, &image_url, Utc::now());
        let path = ctx
            .store
            .add_document(&CollectionPath::new(ITINERARIES), data)
            .await?;
        Ok::<_, TripnestError>(json!({ "id": path.id, "imageUrl": image_url }))
    };

    run_mutation(
        &ctx.cache,
        "create_itinerary",
        write,
        &[KeyPattern::Tag(keys::ITINERARIES)],
    )
    .await
}

pub async fn update(ctx: &AppContext, id: &str, input: NewItinerary) -> TripnestResult<Value> {
    input.validate()?;
    let uid = ctx.require_user()?.uid;

    let write = async {
        load_owned(ctx, &uid, id).await?;
        let image_url = match input.image_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Some(upload_cover(ctx, path).await?),
            None => None,
        };
        ctx.store
            .update_document(
                &DocPath::new(ITINERARIES, id),
                input.to_update_fields(image_url.as_deref()),
            )
            .await?;
        Ok::<_, TripnestError>(json!({ "id": id, "imageUrl": image_url }))
    };

    run_mutation(
        &ctx.cache,
        "update_itinerary",
        write,
        &[
            KeyPattern::Tag(keys::ITINERARIES),
            KeyPattern::Exact(ResourceKey::itinerary(id)),
        ],
    )
    .await
}

/// Writes the explicit favorite value, so repeating a call is harmless.
pub async fn set_favorite(ctx: &AppContext, id: &str, is_favorite: bool) -> TripnestResult<Value> {
    let uid = ctx.require_user()?.uid;

    let write = async {
        load_owned(ctx, &uid, id).await?;
        let mut fields = serde_json::Map::new();
        fields.insert("isFavorite".to_string(), Value::Bool(is_favorite));
        ctx.store
            .update_document(&DocPath::new(ITINERARIES, id), fields)
            .await?;
        Ok::<_, TripnestError>(json!({ "id": id, "isFavorite": is_favorite }))
    };

    run_mutation(
        &ctx.cache,
        "toggle_favorite",
        write,
        &[
            KeyPattern::Exact(ResourceKey::itineraries(&uid)),
            KeyPattern::Exact(ResourceKey::itinerary(id)),
        ],
    )
    .await
}

/// Deletes every activity in one batch, then the itinerary. A failed batch
/// leaves the itinerary in place.
pub async fn delete(ctx: &AppContext, id: &str) -> TripnestResult<Value> {
    let uid = ctx.require_user()?.uid;

    let write = async {
        load_owned(ctx, &uid, id).await?;
        let collection = activities_collection(id);
        let children: Vec<DocPath> = ctx
            .store
            .query(&collection, &QueryFilter::new())
            .await?
            .into_iter()
            .map(|doc| collection.child(doc.id))
            .collect();

        if !children.is_empty() {
            ctx.store.batch_delete(&children).await?;
        }
        ctx.store
            .delete_document(&DocPath::new(ITINERARIES, id))
            .await?;
        tracing::info!(id, activities = children.len(), "Deleted itinerary");
        Ok::<_, TripnestError>(json!({ "id": id, "deletedActivities": children.len() }))
    };

    let deleted = run_mutation(
        &ctx.cache,
        "delete_itinerary",
        write,
        &[
            KeyPattern::Tag(keys::ITINERARIES),
            KeyPattern::Exact(ResourceKey::itinerary(id)),
            KeyPattern::Exact(ResourceKey::activities(id)),
        ],
    )
    .await?;

    let gone = [ResourceKey::itinerary(id), ResourceKey::activities(id)];
    ctx.cache.forget(|key| gone.contains(key));
    Ok(deleted)
}

pub async fn add_activity(
    ctx: &AppContext,
    itinerary_id: &str,
    input: NewActivity,
) -> TripnestResult<Value> {
    input.validate()?;
    let uid = ctx.require_user()?.uid;

    let write = async {
        load_owned(ctx, &uid, itinerary_id).await?;
        let path = ctx
            .store
            .add_document(
                &activities_collection(itinerary_id),
                input.to_document_data(itinerary_id),
            )
            .await?;
        Ok::<_, TripnestError>(json!({ "id": path.id, "itineraryId": itinerary_id }))
    };

    run_mutation(
        &ctx.cache,
        "add_activity",
        write,
        &[KeyPattern::Exact(ResourceKey::activities(itinerary_id))],
    )
    .await
}
