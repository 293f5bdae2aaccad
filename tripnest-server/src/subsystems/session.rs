//! Session
//!
//! Sign-in, sign-up and sign-out mutations, plus a listener that follows the
//! auth provider and drops user-scoped cache entries whenever the signed-in
//! user changes (including changes the daemon did not initiate, such as an
//! expired token).

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tripnest_core::models::Credentials;
use tripnest_core::{TripnestError, TripnestResult};

use super::keys::KeyPattern;
use super::mutator::run_mutation;
use crate::context::AppContext;

pub async fn sign_in(ctx: &AppContext, credentials: Credentials) -> TripnestResult<Value> {
    let auth = ctx.auth.clone();
    let user = run_mutation(
        &ctx.cache,
        "sign_in",
        async move { auth.sign_in(&credentials).await.map_err(TripnestError::from) },
        &[KeyPattern::UserScoped],
    )
    .await?;
    Ok(json!({ "user": user }))
}

pub async fn sign_up(
    ctx: &AppContext,
    credentials: Credentials,
    display_name: Option<String>,
) -> TripnestResult<Value> {
    let auth = ctx.auth.clone();
    let user = run_mutation(
        &ctx.cache,
        "sign_up",
        async move {
            auth.sign_up(&credentials, display_name.as_deref())
                .await
                .map_err(TripnestError::from)
        },
        &[KeyPattern::UserScoped],
    )
    .await?;
    Ok(json!({ "user": user }))
}

pub async fn sign_out(ctx: &AppContext) -> TripnestResult<Value> {
    let auth = ctx.auth.clone();
    run_mutation(
        &ctx.cache,
        "sign_out",
        async move { auth.sign_out().await.map_err(TripnestError::from) },
        &[KeyPattern::UserScoped],
    )
    .await?;
    Ok(json!({ "signedOut": true }))
}

/// Follow auth state until `cancel` fires. Every change of uid invalidates the
/// `user` entry and everything scoped to a user.
pub async fn run_session_listener(ctx: AppContext, cancel: CancellationToken) {
    let mut rx = ctx.auth.subscribe();
    let mut current = rx.borrow_and_update().as_ref().map(|u| u.uid.clone());
    tracing::info!(provider = ctx.auth.name(), signed_in = current.is_some(), "Session listener started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Session listener stopped");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::warn!("Auth provider closed its session channel");
                    break;
                }
                let next = rx.borrow_and_update().as_ref().map(|u| u.uid.clone());
                if next != current {
                    let invalidated = ctx.cache.invalidate(|key| KeyPattern::UserScoped.matches(key));
                    tracing::info!(
                        from = current.as_deref().unwrap_or("-"),
                        to = next.as_deref().unwrap_or("-"),
                        invalidated,
                        "Signed-in user changed"
                    );
                    current = next;
                }
            }
        }
    }
}

pub fn spawn_session_listener(
    ctx: AppContext,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_session_listener(ctx, cancel))
}
