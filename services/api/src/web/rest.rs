//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the public REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::adapters::pdf::to_png;
use crate::error::{ErrorBody, HttpError};
use crate::web::{admin, auth, view, state::AppState};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use course_catalog_core::{
    download_name, Catalog, CatalogError, ChapterLessons, Group, Lesson, LessonFilter, PortError,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

/// Thumbnail width when the client does not ask for one.
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 320;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        catalog_handler,
        lessons_handler,
        thumbnail_handler,
        file_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::session_handler,
        admin::dashboard_handler,
        admin::upload_lesson_handler,
        admin::delete_lesson_handler,
        admin::orphans_handler,
        admin::reclaim_orphans_handler,
        view::get_view_handler,
        view::navigate_handler,
    ),
    components(
        schemas(
            CatalogResponse, ChapterDto, SubjectDto, LessonDto, ErrorBody,
            auth::LoginRequest, auth::SessionResponse,
            admin::DashboardResponse, admin::ChapterLessonsDto, admin::SubjectLessonsDto,
            admin::DeleteResponse, admin::OrphanDto, admin::ReclaimResponse,
            view::ViewDto, view::NavigationRequest, view::ScreenDto, view::ViewResponse,
        )
    ),
    tags(
        (name = "Course Catalog API", description = "Lesson documents of the course catalog, by chapter, subject and group.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct SubjectDto {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChapterDto {
    pub id: String,
    pub name: String,
    pub subjects: Vec<SubjectDto>,
}

#[derive(Serialize, ToSchema)]
pub struct CatalogResponse {
    pub chapters: Vec<ChapterDto>,
    /// The groups lessons are partitioned by.
    pub groups: Vec<String>,
}

impl CatalogResponse {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self {
            chapters: catalog.chapters.iter().map(ChapterDto::from).collect(),
            groups: Group::ALL.iter().map(|g| g.to_string()).collect(),
        }
    }
}

impl From<&course_catalog_core::Chapter> for ChapterDto {
    fn from(chapter: &course_catalog_core::Chapter) -> Self {
        Self {
            id: chapter.id.clone(),
            name: chapter.name.clone(),
            subjects: chapter
                .subjects
                .iter()
                .map(|s| SubjectDto {
                    id: s.id.clone(),
                    name: s.name.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct LessonDto {
    pub id: Uuid,
    /// Original file name, also the download name.
    pub name: String,
    pub file_url: String,
    pub storage_path: String,
    pub chapter_id: String,
    pub subject_id: String,
    pub group: String,
    pub created_at: DateTime<Utc>,
}

impl From<Lesson> for LessonDto {
    fn from(lesson: Lesson) -> Self {
        Self {
            id: lesson.id,
            name: lesson.name,
            file_url: lesson.file_url,
            storage_path: lesson.storage_path,
            chapter_id: lesson.chapter_id,
            subject_id: lesson.subject_id,
            group: lesson.group.to_string(),
            created_at: lesson.created_at,
        }
    }
}

pub fn lesson_dtos(lessons: Vec<Lesson>) -> Vec<LessonDto> {
    lessons.into_iter().map(LessonDto::from).collect()
}

pub fn parse_group(raw: &str) -> Result<Group, HttpError> {
    raw.parse::<Group>()
        .map_err(|e| HttpError::bad_request("invalid_group", e.to_string()))
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LessonsQuery {
    pub chapter_id: String,
    pub subject_id: String,
    /// One of G1, G2, G3.
    pub group: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ThumbnailQuery {
    /// URL of the document whose first page is rendered.
    pub url: String,
    /// Width of the image in pixels.
    pub width: Option<u32>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// The chapters and subjects lessons are filed under.
#[utoipa::path(
    get,
    path = "/catalog",
    responses((status = 200, description = "The static catalog", body = CatalogResponse))
)]
pub async fn catalog_handler(State(state): State<Arc<AppState>>) -> Json<CatalogResponse> {
    Json(CatalogResponse::from_catalog(&state.catalog))
}

/// Lessons of one subject of one chapter for one group, newest first.
#[utoipa::path(
    get,
    path = "/lessons",
    params(LessonsQuery),
    responses(
        (status = 200, description = "Current lessons", body = [LessonDto]),
        (status = 400, description = "Unknown group, chapter or subject", body = ErrorBody),
        (status = 503, description = "Lessons could not be loaded", body = ErrorBody)
    )
)]
pub async fn lessons_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LessonsQuery>,
) -> Result<Json<Vec<LessonDto>>, HttpError> {
    let group = parse_group(&query.group)?;
    if !state.catalog.contains(&query.chapter_id, &query.subject_id) {
        return Err(CatalogError::UnknownScope {
            chapter_id: query.chapter_id,
            subject_id: query.subject_id,
        }
        .into());
    }

    let filter = LessonFilter::scoped(&query.chapter_id, &query.subject_id, group);
    let lessons = state
        .queries
        .snapshot(&filter)
        .await
        .unwrap_or_else(|| Ok(Vec::new()))?;
    Ok(Json(lesson_dtos(lessons)))
}

/// First page of a document as a PNG.
#[utoipa::path(
    get,
    path = "/thumbnails",
    params(ThumbnailQuery),
    responses(
        (status = 200, description = "PNG image", content_type = "image/png"),
        (status = 502, description = "The document could not be fetched or rendered", body = ErrorBody)
    )
)]
pub async fn thumbnail_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let renderer = state.thumbnails.as_ref().ok_or_else(|| {
        CatalogError::Render("no PDF library is available".to_string())
    })?;
    let width = query.width.unwrap_or(DEFAULT_THUMBNAIL_WIDTH);
    let image = renderer.render_first_page(&query.url, width).await?;
    let png = to_png(&image).map_err(|e| {
        error!("Failed to encode thumbnail of {}: {}", query.url, e);
        CatalogError::Render(e.to_string())
    })?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "image/png")], png))
}

/// Raw bytes of an uploaded lesson file.
#[utoipa::path(
    get,
    path = "/files/{path}",
    params(("path" = String, Path, description = "Storage path of the blob")),
    responses(
        (status = 200, description = "The file, downloading under the lesson name", content_type = "application/pdf"),
        (status = 404, description = "No such file")
    )
)]
pub async fn file_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.blobs.read(&path).await {
        Ok(bytes) => {
            let content_type = if path.to_ascii_lowercase().ends_with(".pdf") {
                "application/pdf"
            } else {
                "application/octet-stream"
            };
            Ok((
                [
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (header::CONTENT_DISPOSITION, content_disposition(download_name(&path))),
                ],
                bytes,
            ))
        }
        Err(PortError::NotFound(_)) | Err(PortError::Rejected(_)) => {
            Err((StatusCode::NOT_FOUND, "File not found".to_string()))
        }
        Err(e) => {
            error!("Failed to read blob {}: {}", path, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read file".to_string(),
            ))
        }
    }
}

/// Characters left as-is in an RFC 5987 `filename*` value.
const FILENAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `attachment` disposition carrying `name` as the UTF-8 download name.
pub fn content_disposition(name: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(name, FILENAME_SAFE)
    )
}

/// Dashboard grouping as sent over the wire.
pub fn chapter_lessons_dtos(chapters: Vec<ChapterLessons>) -> Vec<admin::ChapterLessonsDto> {
    chapters
        .into_iter()
        .map(admin::ChapterLessonsDto::from)
        .collect()
}
