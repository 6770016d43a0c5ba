//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, FilesystemBlobStore, HttpDocumentFetcher, JsonFileStorage, PdfiumRasterizer,
    },
    config::{AdminCredential, Config, StoreBackend},
    error::ApiError,
    web::{
        build_router,
        state::{AppState, Backends},
    },
};
use course_catalog_core::{
    memory::MemoryMetadataStore, ports::{MetadataStore, PageRasterizer}, session::hash_password,
    Catalog, CredentialStore,
};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Static Catalog & Credentials ---
    let catalog = Arc::new(load_catalog(&config).await?);
    info!("Catalog has {} chapters", catalog.chapters.len());
    let credentials = build_credentials(&config)?;

    // --- 3. Metadata Store ---
    let metadata: Arc<dyn MetadataStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory metadata store; lessons are lost on restart.");
            Arc::new(MemoryMetadataStore::new())
        }
    };

    // --- 4. Initialize Remaining Adapters ---
    let blobs = Arc::new(
        FilesystemBlobStore::new(config.blob_root.clone(), &config.public_base_url).await?,
    );
    let local_storage = Arc::new(JsonFileStorage::new(config.session_file.clone()));
    let fetcher = Arc::new(HttpDocumentFetcher::new(
        &config.public_base_url,
        config.max_upload_bytes,
    )?);
    let rasterizer: Option<Arc<dyn PageRasterizer>> =
        match PdfiumRasterizer::start(config.pdfium_library_path.clone()) {
            Ok(rasterizer) => Some(Arc::new(rasterizer)),
            Err(e) => {
                warn!("Thumbnails disabled: {}", e);
                None
            }
        };

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(
        AppState::build(
            config.clone(),
            catalog,
            credentials,
            Backends {
                metadata,
                blobs,
                local_storage,
                fetcher,
                rasterizer,
            },
        )
        .await,
    );

    // --- 6. Create the Web Router ---
    let app = build_router(app_state);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn load_catalog(config: &Config) -> Result<Catalog, ApiError> {
    let Some(path) = &config.catalog_path else {
        return Ok(Catalog::standard());
    };
    let raw = tokio::fs::read_to_string(path).await?;
    Catalog::from_json(&raw).map_err(|e| {
        ApiError::Internal(format!("Invalid catalog file {}: {}", path.display(), e))
    })
}

fn build_credentials(config: &Config) -> Result<CredentialStore, ApiError> {
    if config.admin_credentials.is_empty() {
        return Ok(CredentialStore::defaults()?);
    }

    let mut hashes = HashMap::new();
    for (group, credential) in &config.admin_credentials {
        let hash = match credential {
            AdminCredential::Hash(hash) => hash.clone(),
            AdminCredential::Password(password) => hash_password(*group, password)?,
        };
        hashes.insert(*group, hash);
    }
    let store = CredentialStore::from_hashes(hashes)?;
    for group in course_catalog_core::Group::ALL {
        if !store.has_credential(group) {
            warn!("No administrator credential configured for {}", group);
        }
    }
    Ok(store)
}
