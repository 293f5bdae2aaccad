//! Wishlist
//!
//! One document per user at `wishlists/{uid}` holding a `photos` array. Every
//! write is an atomic read-modify-write on that document, so concurrent adds
//! never lose each other's entries.

use serde_json::{json, Value};
use tripnest_core::document::{DocumentModifier, StoreError, StoreResult};
use tripnest_core::models::wishlist::WISHLISTS;
use tripnest_core::models::{Wishlist, WishlistEntry};
use tripnest_core::{DocPath, TripnestError, TripnestResult};

use super::discover;
use super::keys::{KeyPattern, ResourceKey};
use super::mutator::run_mutation;
use crate::context::AppContext;

fn decode(body: Option<Value>) -> StoreResult<Wishlist> {
    match body {
        None => Ok(Wishlist::default()),
        Some(v) => serde_json::from_value(v).map_err(|e| StoreError::Malformed(e.to_string())),
    }
}

fn encode(list: &Wishlist) -> StoreResult<Value> {
    serde_json::to_value(list).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Wrap a pure edit of the list as a store modifier.
fn modifier<F>(edit: F) -> DocumentModifier
where
    F: FnOnce(&mut Wishlist) -> StoreResult<()> + Send + 'static,
{
    Box::new(move |body| {
        let mut list = decode(body)?;
        edit(&mut list)?;
        encode(&list)
    })
}

/// Cached wishlist entries for `uid`.
pub async fn entries(ctx: &AppContext, uid: &str) -> TripnestResult<Vec<WishlistEntry>> {
    ctx.subscribe_checked(&ResourceKey::wishlist(uid))?
        .value()
        .await
}

pub async fn list(ctx: &AppContext) -> TripnestResult<Value> {
    let uid = ctx.require_user()?.uid;
    let photos = entries(ctx, &uid).await?;
    Ok(json!({ "photos": photos, "count": photos.len() }))
}

async fn write(
    ctx: &AppContext,
    name: &str,
    uid: &str,
    edit: DocumentModifier,
) -> TripnestResult<Wishlist> {
    let path = DocPath::new(WISHLISTS, uid);
    let store = ctx.store.clone();
    run_mutation(
        &ctx.cache,
        name,
        async move {
            let body = store.modify_document(&path, edit).await?;
            decode(Some(body)).map_err(TripnestError::from)
        },
        &[KeyPattern::Exact(ResourceKey::wishlist(uid))],
    )
    .await
}

/// Add a photo from the current discover feed. Adding an id that is already
/// present changes nothing.
pub async fn add(ctx: &AppContext, photo_id: &str) -> TripnestResult<Value> {
    let uid = ctx.require_user()?.uid;
    let entry = discover::entry_for(ctx, photo_id)
        .ok_or_else(|| TripnestError::NotFound(format!("photo {} is not in the feed", photo_id)))?;

    let list = write(
        ctx,
        "add_to_wishlist",
        &uid,
        modifier(move |list| {
            list.add(entry);
            Ok(())
        }),
    )
    .await?;
    Ok(json!({ "inWishlist": true, "count": list.len() }))
}

/// Remove an entry equal to `entry` in every field; anything else is a no-op.
pub async fn remove(ctx: &AppContext, entry: WishlistEntry) -> TripnestResult<Value> {
    let uid = ctx.require_user()?.uid;
    let id = entry.id.clone();

    let list = write(
        ctx,
        "remove_from_wishlist",
        &uid,
        modifier(move |list| {
            list.remove(&entry);
            Ok(())
        }),
    )
    .await?;
    Ok(json!({ "inWishlist": list.contains_id(&id), "count": list.len() }))
}

/// Discover-page heart button: remove the stored entry with this id if there
/// is one, otherwise add the photo.
pub async fn toggle(ctx: &AppContext, photo_id: &str) -> TripnestResult<Value> {
    let uid = ctx.require_user()?.uid;
    let candidate = discover::entry_for(ctx, photo_id);
    let id = photo_id.to_string();
    let lookup = id.clone();

    let list = write(
        ctx,
        "toggle_wishlist",
        &uid,
        modifier(move |list| {
            if let Some(stored) = list.find(&lookup).cloned() {
                list.remove(&stored);
                return Ok(());
            }
            match candidate {
                Some(entry) => {
                    list.add(entry);
                    Ok(())
                }
                None => Err(StoreError::NotFound(format!("photo {} is not in the feed", lookup))),
            }
        }),
    )
    .await?;
    Ok(json!({ "inWishlist": list.contains_id(&id), "count": list.len() }))
}
