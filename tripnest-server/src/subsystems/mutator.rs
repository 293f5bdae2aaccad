//! Mutations
//!
//! A mutation runs one write against a collaborator and, only when the write
//! succeeds, invalidates the cache keys it names in a single pass. The
//! caller gets a [`MutationHandle`] that exposes pending, success and error
//! states; failures are never raised past the handle.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tripnest_core::ipc::Mutation;
use tripnest_core::{ErrorInfo, TripnestError, TripnestResult};
use uuid::Uuid;

use super::cache::CacheStore;
use super::keys::KeyPattern;
use super::{discover, itineraries, session, wishlist};
use crate::context::AppContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationState {
    Pending,
    Success { value: Value },
    Error { error: ErrorInfo },
}

impl MutationState {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationState::Pending)
    }
}

/// Run `write`, then invalidate every key matching `patterns` if it succeeded.
pub async fn run_mutation<T, Fut>(
    cache: &CacheStore,
    name: &str,
    write: Fut,
    patterns: &[KeyPattern],
) -> TripnestResult<T>
where
    Fut: Future<Output = TripnestResult<T>>,
{
    match write.await {
        Ok(value) => {
            let invalidated = cache.invalidate(|key| patterns.iter().any(|p| p.matches(key)));
            tracing::info!(mutation = name, invalidated, "Mutation succeeded");
            Ok(value)
        }
        Err(e) => {
            tracing::warn!(mutation = name, error = %e, "Mutation failed");
            Err(e)
        }
    }
}

pub struct MutationHandle {
    id: Uuid,
    name: &'static str,
    rx: watch::Receiver<MutationState>,
}

impl MutationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> MutationState {
        self.rx.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.rx.borrow().is_pending()
    }

    /// Wait until the mutation leaves `Pending`.
    pub async fn wait(&mut self) -> MutationState {
        let settled = match self.rx.wait_for(|s| !s.is_pending()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        // Sender gone: whatever it last published is final.
        settled.unwrap_or_else(|| self.rx.borrow().clone())
    }

    pub async fn into_result(mut self) -> TripnestResult<Value> {
        match self.wait().await {
            MutationState::Success { value } => Ok(value),
            MutationState::Error { error } => Err(error.into()),
            MutationState::Pending => Err(TripnestError::Other(format!(
                "mutation {} was dropped before completing",
                self.name
            ))),
        }
    }
}

/// Start a mutation in the background and hand back its handle.
pub fn invoke(ctx: &AppContext, mutation: Mutation) -> MutationHandle {
    let (tx, rx) = watch::channel(MutationState::Pending);
    let id = Uuid::new_v4();
    let name = mutation.name();
    let ctx = ctx.clone();

    tracing::debug!(mutation = name, %id, "Mutation started");
    tokio::spawn(async move {
        let state = match execute(&ctx, mutation).await {
            Ok(value) => MutationState::Success { value },
            Err(e) => MutationState::Error { error: e.info() },
        };
        let _ = tx.send(state);
    });

    MutationHandle { id, name, rx }
}

pub async fn execute(ctx: &AppContext, mutation: Mutation) -> TripnestResult<Value> {
    match mutation {
        Mutation::CreateItinerary { itinerary } => itineraries::create(ctx, itinerary).await,
        Mutation::UpdateItinerary { id, itinerary } => {
            itineraries::update(ctx, &id, itinerary).await
        }
        Mutation::ToggleFavorite { id, is_favorite } => {
            itineraries::set_favorite(ctx, &id, is_favorite).await
        }
        Mutation::DeleteItinerary { id } => itineraries::delete(ctx, &id).await,
        Mutation::AddActivity {
            itinerary_id,
            activity,
        } => itineraries::add_activity(ctx, &itinerary_id, activity).await,
        Mutation::AddToWishlist { photo_id } => wishlist::add(ctx, &photo_id).await,
        Mutation::RemoveFromWishlist { entry } => wishlist::remove(ctx, entry).await,
        Mutation::ToggleWishlist { photo_id } => wishlist::toggle(ctx, &photo_id).await,
        Mutation::SignIn { credentials } => session::sign_in(ctx, credentials).await,
        Mutation::SignUp {
            credentials,
            display_name,
        } => session::sign_up(ctx, credentials, display_name).await,
        Mutation::SignOut => session::sign_out(ctx).await,
        Mutation::LoadMorePhotos => discover::load_more(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use super::super::cache::{CacheStatus, FreshnessPolicy};
    use super::super::fetcher::Fetcher;
    use super::super::keys::{self, ResourceKey};

    struct ConstFetcher;

    #[async_trait]
    impl Fetcher for ConstFetcher {
        async fn fetch(&self, _key: &ResourceKey) -> TripnestResult<Value> {
            Ok(Value::from(1))
        }
    }

    fn cache() -> CacheStore {
        CacheStore::new(Arc::new(ConstFetcher), FreshnessPolicy::new())
    }

    #[tokio::test]
    async fn test_success_invalidates_matching_keys_only() {
        let cache = cache();
        let mut a = cache.subscribe(&ResourceKey::itineraries("u1"));
        let mut b = cache.subscribe(&ResourceKey::wishlist("u1"));
        a.settled().await.unwrap();
        b.settled().await.unwrap();

        let out = run_mutation(
            &cache,
            "test",
            async { Ok::<_, TripnestError>(7) },
            &[KeyPattern::Tag(keys::ITINERARIES)],
        )
        .await
        .unwrap();
        assert_eq!(out, 7);

        assert_ne!(
            cache.get(&ResourceKey::itineraries("u1")).status,
            CacheStatus::Success
        );
        assert_eq!(
            cache.get(&ResourceKey::wishlist("u1")).status,
            CacheStatus::Success
        );
    }

    #[tokio::test]
    async fn test_failure_invalidates_nothing() {
        let cache = cache();
        let mut a = cache.subscribe(&ResourceKey::itineraries("u1"));
        a.settled().await.unwrap();
        let before = cache.stats().fetches_started;

        let res: TripnestResult<()> = run_mutation(
            &cache,
            "test",
            async { Err(TripnestError::Network("offline".to_string())) },
            &[KeyPattern::Tag(keys::ITINERARIES)],
        )
        .await;
        assert!(matches!(res, Err(TripnestError::Network(_))));
        assert_eq!(
            cache.get(&ResourceKey::itineraries("u1")).status,
            CacheStatus::Success
        );
        assert_eq!(cache.stats().fetches_started, before);
    }

    #[test]
    fn test_state_serializes_with_status_tag() {
        let state = MutationState::Error {
            error: TripnestError::Validation("title is required".to_string()).info(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "validation");
        assert_eq!(
            serde_json::to_value(MutationState::Pending).unwrap()["status"],
            "pending"
        );
    }
}
