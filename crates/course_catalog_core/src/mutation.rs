//! crates/course_catalog_core/src/mutation.rs
//!
//! Creating and deleting lessons. Each operation spans the blob store and the
//! metadata store, which share no transaction: the steps run in a fixed order
//! and whatever a failed step strands is recorded for reclamation.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    Catalog, Group, Lesson, LessonQuery, LessonRecord, NewLesson, OrphanReason, OrphanedBlob,
};
use crate::error::{CatalogError, CatalogResult};
use crate::ports::{BlobStore, MetadataStore};

/// Result of a delete whose metadata step succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// False when the blob could not be removed and is now an orphan.
    pub blob_removed: bool,
}

pub struct LessonMutationService {
    catalog: Arc<Catalog>,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    orphans: Mutex<Vec<OrphanedBlob>>,
}

impl LessonMutationService {
    pub fn new(
        catalog: Arc<Catalog>,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            catalog,
            metadata,
            blobs,
            orphans: Mutex::new(Vec::new()),
        }
    }

    /// Uploads the file and records its metadata.
    pub async fn add_lesson(&self, new_lesson: NewLesson) -> CatalogResult<Lesson> {
        if new_lesson.bytes.is_empty() {
            return Err(CatalogError::EmptyFile);
        }
        let file_name = validate_file_name(&new_lesson.file_name)?;
        if !self
            .catalog
            .contains(&new_lesson.chapter_id, &new_lesson.subject_id)
        {
            return Err(CatalogError::UnknownScope {
                chapter_id: new_lesson.chapter_id,
                subject_id: new_lesson.subject_id,
            });
        }

        let storage_path = storage_path(
            &new_lesson.chapter_id,
            &new_lesson.subject_id,
            new_lesson.group,
            file_name,
        );

        self.blobs
            .upload(&storage_path, new_lesson.bytes)
            .await
            .map_err(|e| {
                error!("Upload of {} failed: {}", storage_path, e);
                CatalogError::Upload(e)
            })?;

        let file_url = match self.blobs.resolve_url(&storage_path).await {
            Ok(url) => url,
            Err(e) => {
                error!("Could not resolve a URL for {}: {}", storage_path, e);
                self.record_orphan(&storage_path, OrphanReason::UploadedWithoutMetadata)
                    .await;
                return Err(CatalogError::Upload(e));
            }
        };

        let record = LessonRecord {
            name: file_name.to_string(),
            file_url,
            storage_path: storage_path.clone(),
            chapter_id: new_lesson.chapter_id,
            subject_id: new_lesson.subject_id,
            group: new_lesson.group,
        };

        match self.metadata.insert_lesson(record).await {
            Ok(lesson) => {
                info!(
                    "Added lesson {} ({}) to {}/{}/{}",
                    lesson.id, lesson.name, lesson.chapter_id, lesson.subject_id, lesson.group
                );
                Ok(lesson)
            }
            Err(e) => {
                error!("Metadata write for {} failed: {}", storage_path, e);
                self.record_orphan(&storage_path, OrphanReason::UploadedWithoutMetadata)
                    .await;
                Err(CatalogError::Metadata(e))
            }
        }
    }

    /// Removes the metadata record, then the blob. If the record cannot be
    /// removed nothing else is attempted and the lesson stays listed.
    pub async fn delete_lesson(&self, lesson: &Lesson) -> CatalogResult<DeleteOutcome> {
        self.metadata.delete_lesson(lesson.id).await.map_err(|e| {
            error!("Deleting metadata of lesson {} failed: {}", lesson.id, e);
            CatalogError::Delete(e)
        })?;

        match self.blobs.delete(&lesson.storage_path).await {
            Ok(()) => {
                info!("Deleted lesson {} ({})", lesson.id, lesson.name);
                Ok(DeleteOutcome { blob_removed: true })
            }
            Err(e) => {
                warn!(
                    "Lesson {} deleted but its blob {} was not: {}",
                    lesson.id, lesson.storage_path, e
                );
                self.record_orphan(&lesson.storage_path, OrphanReason::MetadataDeleted)
                    .await;
                Ok(DeleteOutcome {
                    blob_removed: false,
                })
            }
        }
    }

    /// Looks a lesson up by id among the lessons of `group`.
    pub async fn find_lesson(&self, group: Group, id: Uuid) -> CatalogResult<Lesson> {
        let query = LessonQuery { group, scope: None };
        let mut live = self
            .metadata
            .live_query(query)
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
        let lessons = match live.next().await {
            Some(Ok(lessons)) => lessons,
            Some(Err(e)) => return Err(CatalogError::Unavailable(e.to_string())),
            None => return Err(CatalogError::Unavailable("live query ended".to_string())),
        };
        lessons
            .into_iter()
            .find(|l| l.id == id)
            .ok_or_else(|| CatalogError::LessonNotFound(id.to_string()))
    }

    pub async fn orphaned_blobs(&self) -> Vec<OrphanedBlob> {
        self.orphans.lock().await.clone()
    }

    /// Retries the deletion of every recorded orphan. Returns how many were
    /// reclaimed; the rest stay recorded.
    pub async fn reclaim_orphans(&self) -> usize {
        let pending = std::mem::take(&mut *self.orphans.lock().await);
        let mut remaining = Vec::new();
        let mut reclaimed = 0;

        for orphan in pending {
            match self.blobs.delete(&orphan.storage_path).await {
                Ok(()) => {
                    info!("Reclaimed orphaned blob {}", orphan.storage_path);
                    reclaimed += 1;
                }
                Err(e) => {
                    warn!("Orphaned blob {} still not removable: {}", orphan.storage_path, e);
                    remaining.push(orphan);
                }
            }
        }

        self.orphans.lock().await.extend(remaining);
        reclaimed
    }

    async fn record_orphan(&self, storage_path: &str, reason: OrphanReason) {
        warn!("Recording orphaned blob {} ({:?})", storage_path, reason);
        self.orphans.lock().await.push(OrphanedBlob {
            storage_path: storage_path.to_string(),
            reason,
            detected_at: Utc::now(),
        });
    }
}

//=========================================================================================
// Upload Policy
//=========================================================================================

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

const PDF_CONTENT_TYPE: &str = "application/pdf";
const PDF_MAGIC: &[u8] = b"%PDF";

/// What an admin may upload: PDF documents up to `max_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl UploadPolicy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// A file counts as a PDF when its declared type says so, or, lacking a
    /// usable type, when its name ends in `.pdf` and its bytes start with the
    /// PDF header.
    pub fn check(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> CatalogResult<()> {
        if bytes.is_empty() {
            return Err(CatalogError::EmptyFile);
        }
        let declared_pdf = content_type
            .map(|ct| ct.split(';').next().unwrap_or_default().trim())
            .is_some_and(|ct| ct.eq_ignore_ascii_case(PDF_CONTENT_TYPE));
        let sniffed_pdf = file_name.to_ascii_lowercase().ends_with(".pdf")
            && bytes.starts_with(PDF_MAGIC);
        if !declared_pdf && !sniffed_pdf {
            return Err(CatalogError::NotPdf);
        }
        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(CatalogError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// `lessons/{chapter}/{subject}/{group}/{uuid v7}_{file name}`. The UUIDv7 is
/// time-ordered and unique, so two uploads of the same file never collide.
pub fn storage_path(chapter_id: &str, subject_id: &str, group: Group, file_name: &str) -> String {
    format!(
        "lessons/{}/{}/{}/{}_{}",
        chapter_id,
        subject_id,
        group,
        Uuid::now_v7().simple(),
        file_name
    )
}

/// The lesson name a stored blob downloads as: the last path segment without
/// the unique prefix [`storage_path`] adds.
pub fn download_name(storage_path: &str) -> &str {
    let file = storage_path.rsplit('/').next().unwrap_or(storage_path);
    match file.split_once('_') {
        Some((prefix, name))
            if prefix.len() == 32
                && !name.is_empty()
                && prefix.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            name
        }
        _ => file,
    }
}

/// Accepts flat file names only.
pub fn validate_file_name(file_name: &str) -> CatalogResult<&str> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::InvalidFileName("file name cannot be empty"));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(CatalogError::InvalidFileName(
            "control characters are not allowed",
        ));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(CatalogError::InvalidFileName(
            "path separators are not allowed",
        ));
    }
    if trimmed.starts_with('.') {
        return Err(CatalogError::InvalidFileName(
            "names starting with '.' are not allowed",
        ));
    }
    Ok(trimmed)
}
