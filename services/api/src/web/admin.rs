//! services/api/src/web/admin.rs
//!
//! Handlers of the administrator dashboard. Every route acts on the group of
//! the current session, which `require_session` puts in the extensions.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use course_catalog_core::{
    group_by_subject, CatalogError, ChapterLessons, LessonFilter, NewLesson, OrphanReason,
    OrphanedBlob, SubjectLessons,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ErrorBody, HttpError};
use crate::web::middleware::AdminGroup;
use crate::web::rest::{chapter_lessons_dtos, lesson_dtos, LessonDto};
use crate::web::state::AppState;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SubjectLessonsDto {
    pub subject_id: String,
    pub subject_name: String,
    pub lessons: Vec<LessonDto>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChapterLessonsDto {
    pub chapter_id: String,
    pub chapter_name: String,
    /// Only subjects that have lessons.
    pub subjects: Vec<SubjectLessonsDto>,
}

impl From<SubjectLessons> for SubjectLessonsDto {
    fn from(subject: SubjectLessons) -> Self {
        Self {
            subject_id: subject.subject_id,
            subject_name: subject.subject_name,
            lessons: lesson_dtos(subject.lessons),
        }
    }
}

impl From<ChapterLessons> for ChapterLessonsDto {
    fn from(chapter: ChapterLessons) -> Self {
        Self {
            chapter_id: chapter.chapter_id,
            chapter_name: chapter.chapter_name,
            subjects: chapter
                .subjects
                .into_iter()
                .map(SubjectLessonsDto::from)
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DashboardResponse {
    pub group: String,
    pub chapters: Vec<ChapterLessonsDto>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct DeleteResponse {
    /// False when the file stayed behind and was recorded as an orphan.
    pub blob_removed: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct OrphanDto {
    pub storage_path: String,
    /// `uploaded_without_metadata` or `metadata_deleted`.
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

impl From<OrphanedBlob> for OrphanDto {
    fn from(orphan: OrphanedBlob) -> Self {
        let reason = match orphan.reason {
            OrphanReason::UploadedWithoutMetadata => "uploaded_without_metadata",
            OrphanReason::MetadataDeleted => "metadata_deleted",
        };
        Self {
            storage_path: orphan.storage_path,
            reason: reason.to_string(),
            detected_at: orphan.detected_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct ReclaimResponse {
    pub reclaimed: usize,
    pub remaining: usize,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// All lessons of the session's group, by chapter and subject.
#[utoipa::path(
    get,
    path = "/admin/lessons",
    responses(
        (status = 200, description = "Dashboard", body = DashboardResponse),
        (status = 401, description = "Not logged in", body = ErrorBody),
        (status = 503, description = "Lessons could not be loaded", body = ErrorBody)
    )
)]
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminGroup(group)): Extension<AdminGroup>,
) -> Result<Json<DashboardResponse>, HttpError> {
    let lessons = state
        .queries
        .snapshot(&LessonFilter::whole_group(Some(group)))
        .await
        .unwrap_or_else(|| Ok(Vec::new()))?;

    Ok(Json(DashboardResponse {
        group: group.to_string(),
        chapters: chapter_lessons_dtos(group_by_subject(&state.catalog, &lessons)),
    }))
}

/// Upload a lesson PDF for the session's group.
///
/// Accepts a multipart/form-data request with `chapter_id`, `subject_id` and
/// a `file` part.
#[utoipa::path(
    post,
    path = "/admin/lessons",
    request_body(content_type = "multipart/form-data", description = "chapter_id, subject_id and the PDF file."),
    responses(
        (status = 201, description = "Lesson created", body = LessonDto),
        (status = 400, description = "Missing field, unknown scope or bad file name", body = ErrorBody),
        (status = 401, description = "Not logged in", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody),
        (status = 415, description = "Not a PDF", body = ErrorBody),
        (status = 500, description = "Upload or metadata write failed", body = ErrorBody)
    )
)]
pub async fn upload_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminGroup(group)): Extension<AdminGroup>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HttpError> {
    let limit = state.upload_policy.max_bytes;
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            HttpError::from(CatalogError::TooLarge { size: limit + 1, limit })
        } else {
            HttpError::bad_request("invalid_form", e.body_text())
        }
    };

    let mut chapter_id = None;
    let mut subject_id = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chapter_id" => chapter_id = Some(field.text().await.map_err(multipart_error)?),
            "subject_id" => subject_id = Some(field.text().await.map_err(multipart_error)?),
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, content_type, bytes));
            }
            _ => {}
        }
    }

    let missing = |name: &str| HttpError::bad_request("invalid_form", format!("missing field '{}'", name));
    let chapter_id = chapter_id.ok_or_else(|| missing("chapter_id"))?;
    let subject_id = subject_id.ok_or_else(|| missing("subject_id"))?;
    let (file_name, content_type, bytes) = file.ok_or_else(|| missing("file"))?;

    state
        .upload_policy
        .check(&file_name, content_type.as_deref(), &bytes)?;

    let lesson = state
        .mutations
        .add_lesson(NewLesson {
            chapter_id,
            subject_id,
            group,
            file_name,
            bytes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(LessonDto::from(lesson))))
}

/// Delete a lesson of the session's group.
#[utoipa::path(
    delete,
    path = "/admin/lessons/{id}",
    params(("id" = Uuid, Path, description = "Lesson id")),
    responses(
        (status = 200, description = "Lesson deleted", body = DeleteResponse),
        (status = 401, description = "Not logged in", body = ErrorBody),
        (status = 404, description = "No such lesson in this group", body = ErrorBody),
        (status = 500, description = "The metadata record could not be deleted", body = ErrorBody)
    )
)]
pub async fn delete_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminGroup(group)): Extension<AdminGroup>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, HttpError> {
    let lesson = state.mutations.find_lesson(group, id).await?;
    let outcome = state.mutations.delete_lesson(&lesson).await?;
    Ok(Json(DeleteResponse {
        blob_removed: outcome.blob_removed,
    }))
}

/// Files left behind by partially failed uploads or deletions.
#[utoipa::path(
    get,
    path = "/admin/orphans",
    responses(
        (status = 200, description = "Recorded orphans", body = [OrphanDto]),
        (status = 401, description = "Not logged in", body = ErrorBody)
    )
)]
pub async fn orphans_handler(State(state): State<Arc<AppState>>) -> Json<Vec<OrphanDto>> {
    let orphans = state.mutations.orphaned_blobs().await;
    Json(orphans.into_iter().map(OrphanDto::from).collect())
}

/// Retry deleting every recorded orphan.
#[utoipa::path(
    post,
    path = "/admin/orphans/reclaim",
    responses(
        (status = 200, description = "Reclaim result", body = ReclaimResponse),
        (status = 401, description = "Not logged in", body = ErrorBody)
    )
)]
pub async fn reclaim_orphans_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ReclaimResponse> {
    let reclaimed = state.mutations.reclaim_orphans().await;
    let remaining = state.mutations.orphaned_blobs().await.len();
    if remaining > 0 {
        error!("{} orphaned blobs could not be reclaimed", remaining);
    } else {
        info!("Reclaimed {} orphaned blobs", reclaimed);
    }
    Json(ReclaimResponse {
        reclaimed,
        remaining,
    })
}
