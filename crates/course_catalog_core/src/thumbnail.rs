//! crates/course_catalog_core/src/thumbnail.rs
//!
//! First-page previews of lesson documents.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::RasterImage;
use crate::error::{CatalogError, CatalogResult};
use crate::ports::{DocumentFetcher, PageRasterizer};

type CacheKey = (String, u32);

pub struct ThumbnailRenderer {
    fetcher: Arc<dyn DocumentFetcher>,
    rasterizer: Arc<dyn PageRasterizer>,
    cache: Option<Mutex<LruCache<CacheKey, RasterImage>>>,
}

impl ThumbnailRenderer {
    /// A renderer without caching: every call fetches and renders.
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            fetcher,
            rasterizer,
            cache: None,
        }
    }

    /// Keeps up to `capacity` rendered pages keyed by (url, width).
    /// A capacity of zero disables the cache.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        self
    }

    pub fn caches(&self) -> bool {
        self.cache.is_some()
    }

    /// Renders the first page of the document at `document_url`, `target_width`
    /// pixels wide.
    pub async fn render_first_page(
        &self,
        document_url: &str,
        target_width: u32,
    ) -> CatalogResult<RasterImage> {
        if target_width == 0 {
            return Err(CatalogError::Render(
                "target width must be at least one pixel".to_string(),
            ));
        }

        let key = (document_url.to_string(), target_width);
        if let Some(cache) = &self.cache {
            if let Some(image) = cache.lock().await.get(&key) {
                debug!("Thumbnail cache hit for {} @ {}px", document_url, target_width);
                return Ok(image.clone());
            }
        }

        let document = self.fetcher.fetch(document_url).await.map_err(|e| {
            warn!("Failed to fetch {}: {}", document_url, e);
            CatalogError::Fetch(e)
        })?;

        let image = self
            .rasterizer
            .rasterize_first_page(document, target_width)
            .await
            .map_err(|e| {
                warn!("Failed to render {}: {}", document_url, e);
                CatalogError::Render(e.to_string())
            })?;

        if let Some(cache) = &self.cache {
            cache.lock().await.put(key, image.clone());
        }
        Ok(image)
    }
}
