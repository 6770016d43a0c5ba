//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use course_catalog_core::ports::{BlobStore, DocumentFetcher, LocalStorage, MetadataStore, PageRasterizer};
use course_catalog_core::{
    Catalog, CatalogQueryService, CredentialStore, LessonMutationService, Navigator,
    SessionRegistry, ThumbnailRenderer, UploadPolicy,
};
use std::sync::Arc;
use tokio::sync::Mutex;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
    /// Administrator sessions, one per logged-in client.
    pub sessions: SessionRegistry,
    pub queries: CatalogQueryService,
    pub mutations: LessonMutationService,
    pub blobs: Arc<dyn BlobStore>,
    /// `None` when no PDF library could be bound.
    pub thumbnails: Option<ThumbnailRenderer>,
    pub upload_policy: UploadPolicy,
    pub navigator: Mutex<Navigator>,
}

/// The adapters a running service is wired with.
pub struct Backends {
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub local_storage: Arc<dyn LocalStorage>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub rasterizer: Option<Arc<dyn PageRasterizer>>,
}

impl AppState {
    /// Wires the core services over the given adapters, restoring any
    /// persisted administrator sessions.
    pub async fn build(
        config: Arc<Config>,
        catalog: Arc<Catalog>,
        credentials: CredentialStore,
        backends: Backends,
    ) -> Self {
        let sessions = SessionRegistry::restore(credentials, backends.local_storage).await;
        let thumbnails = backends.rasterizer.map(|rasterizer| {
            ThumbnailRenderer::new(backends.fetcher, rasterizer)
                .with_cache_capacity(config.thumbnail_cache_capacity)
        });

        Self {
            queries: CatalogQueryService::new(backends.metadata.clone()),
            mutations: LessonMutationService::new(
                catalog.clone(),
                backends.metadata,
                backends.blobs.clone(),
            ),
            blobs: backends.blobs,
            upload_policy: UploadPolicy::new(config.max_upload_bytes),
            navigator: Mutex::new(Navigator::new(catalog.clone())),
            thumbnails,
            sessions,
            catalog,
            config,
        }
    }
}
