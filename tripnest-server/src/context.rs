//! Application context
//!
//! Everything a request handler needs: config, the cache, and the remote
//! collaborators. Passed explicitly to every operation; cloning is cheap.

use std::sync::Arc;
use std::time::Duration;

use tripnest_core::config::{AuthBackend, StoreBackend};
use tripnest_core::models::{Category, UserIdentity};
use tripnest_core::{
    AuthProvider, CloudinaryUploader, DisabledPhotoSource, DisabledUploader, DocumentStore,
    FallbackEnricher, IdentityToolkitClient, InMemoryAuthProvider, InMemoryDocumentStore,
    ObjectUploader, PgDocumentStore, PhotoSource, TextEnricher, TripnestConfig, TripnestError,
    TripnestResult, UnsplashClient,
};

use crate::subsystems::cache::{CacheStore, Freshness, FreshnessPolicy, Subscription};
use crate::subsystems::discover::{DiscoverFeed, EnrichmentPipeline};
use crate::subsystems::fetcher::ResourceFetcher;
use crate::subsystems::keys::{self, ResourceKey};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<TripnestConfig>,
    pub cache: CacheStore,
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub uploader: Arc<dyn ObjectUploader>,
    pub discover: Arc<DiscoverFeed>,
}

impl AppContext {
    pub fn new(
        config: TripnestConfig,
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        photos: Arc<dyn PhotoSource>,
        enricher: Arc<dyn TextEnricher>,
        uploader: Arc<dyn ObjectUploader>,
    ) -> Self {
        let fallback = Category::from_label(&config.enrichment.fallback_category);
        let pipeline = EnrichmentPipeline::new(photos, enricher, &config.discovery, fallback);
        let discover = Arc::new(DiscoverFeed::new(Arc::new(pipeline)));

        let fetcher = ResourceFetcher::new(store.clone(), auth.clone(), discover.clone());
        let policy = FreshnessPolicy::new().with(
            keys::DISCOVER_PHOTOS,
            Freshness::For(Duration::from_secs(config.discovery.stale_minutes * 60)),
        );

        Self {
            config: Arc::new(config),
            cache: CacheStore::new(Arc::new(fetcher), policy),
            store,
            auth,
            uploader,
            discover,
        }
    }

    /// Build the real collaborators named by the config. Missing API keys
    /// disable the feature they gate instead of failing startup.
    pub async fn from_config(config: TripnestConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.database.backend {
            StoreBackend::Memory => Arc::new(InMemoryDocumentStore::new()),
            StoreBackend::Postgres => {
                let pool = tripnest_core::db::create_pool(&config.database).await?;
                Arc::new(PgDocumentStore::connect(pool).await?)
            }
        };

        let auth: Arc<dyn AuthProvider> = match config.auth.backend {
            AuthBackend::Memory => Arc::new(InMemoryAuthProvider::new()),
            AuthBackend::IdentityToolkit => {
                Arc::new(IdentityToolkitClient::new(None, config.auth.base_url.clone())?)
            }
        };

        let photos: Arc<dyn PhotoSource> = match UnsplashClient::new(
            None,
            config.discovery.base_url.clone(),
            config.discovery.orientation.clone(),
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!("Photo discovery disabled: {}", e);
                Arc::new(DisabledPhotoSource)
            }
        };

        let enricher: Arc<dyn TextEnricher> =
            Arc::new(FallbackEnricher::from_config(&config.enrichment));

        let uploader: Arc<dyn ObjectUploader> = match CloudinaryUploader::new(&config.upload) {
            Ok(u) => Arc::new(u),
            Err(e) => {
                tracing::warn!("Cover uploads disabled: {}", e);
                Arc::new(DisabledUploader)
            }
        };

        tracing::info!(
            store = store.backend_name(),
            auth = auth.name(),
            photos = photos.name(),
            enricher = enricher.name(),
            uploader = uploader.name(),
            "Collaborators ready"
        );

        Ok(Self::new(config, store, auth, photos, enricher, uploader))
    }

    pub fn require_user(&self) -> TripnestResult<UserIdentity> {
        self.auth
            .current_user()
            .ok_or_else(|| TripnestError::PermissionDenied("sign in required".to_string()))
    }

    /// Subscribe to `key` after checking the session may read it. User-scoped
    /// keys need a signed-in user, and keys naming an owner must name that
    /// user. A rejected key never creates a cache entry.
    pub fn subscribe_checked(&self, key: &ResourceKey) -> TripnestResult<Subscription> {
        if !key.is_known() {
            return Err(TripnestError::NotFound(format!(
                "unknown resource type '{}'",
                key.tag()
            )));
        }
        if key.is_user_scoped() && key.tag() != keys::USER {
            let user = self.require_user()?;
            if let Some(owner) = key.owner() {
                if owner != user.uid {
                    return Err(TripnestError::PermissionDenied(format!(
                        "{} belongs to another user",
                        key
                    )));
                }
            }
        }
        Ok(self.cache.subscribe(key))
    }
}
