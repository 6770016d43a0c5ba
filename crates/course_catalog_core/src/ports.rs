//! crates/course_catalog_core/src/ports.rs
//!
//! Defines the service contracts (traits) for every external system the
//! catalog talks to. The core services only ever see these traits, so the
//! hosted stores, local persistence and the PDF library can be swapped out.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{Lesson, LessonQuery, LessonRecord, RasterImage};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Rejected by the backing service: {0}")]
    Rejected(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A live query: the first item is the current matching set, every later item
/// is the full set after a change. An `Err` item ends the query.
pub type LiveQuery = Pin<Box<dyn Stream<Item = PortResult<Vec<Lesson>>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The structured document store holding lesson metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Opens a live query over the lessons matching `query`, newest first.
    async fn live_query(&self, query: LessonQuery) -> PortResult<LiveQuery>;

    /// Inserts a record; the store assigns its id and creation time.
    async fn insert_lesson(&self, record: LessonRecord) -> PortResult<Lesson>;

    async fn delete_lesson(&self, id: Uuid) -> PortResult<()>;
}

/// The object store holding the uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, data: Bytes) -> PortResult<()>;

    /// Resolves a URL anyone can fetch the blob from.
    async fn resolve_url(&self, path: &str) -> PortResult<String>;

    async fn delete(&self, path: &str) -> PortResult<()>;

    async fn read(&self, path: &str) -> PortResult<Bytes>;
}

/// Durable client-local key/value persistence.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> PortResult<()>;
    async fn remove(&self, key: &str) -> PortResult<()>;
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Downloads a document. A non-success response is an error.
    async fn fetch(&self, url: &str) -> PortResult<Bytes>;
}

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Parses a document and renders its first page scaled to `target_width`
    /// pixels wide, keeping the page's aspect ratio.
    async fn rasterize_first_page(&self, document: Bytes, target_width: u32)
        -> PortResult<RasterImage>;
}
