pub mod auth;
pub mod config;
pub mod db;
pub mod document;
pub mod enrichment;
pub mod error;
pub mod ipc;
pub mod models;
pub mod photos;
pub mod upload;

pub use auth::{AuthError, AuthProvider, IdentityToolkitClient, InMemoryAuthProvider};
pub use config::TripnestConfig;
pub use document::{
    CollectionPath, DocPath, Document, DocumentStore, InMemoryDocumentStore, PgDocumentStore,
    QueryFilter, StoreError,
};
pub use enrichment::{
    Enrichment, EnrichmentError, FallbackEnricher, GeminiEnrichmentClient, TextEnricher,
};
pub use error::{ErrorInfo, ErrorKind, TripnestError, TripnestResult};
pub use photos::{DisabledPhotoSource, PhotoError, PhotoSource, UnsplashClient};
pub use upload::{CloudinaryUploader, DisabledUploader, ObjectUploader, UploadError, UploadFile};
