//! services/api/src/web/view.rs
//!
//! The front end's navigation state over HTTP: read the current view with the
//! data its screen shows, or apply one navigation step.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use course_catalog_core::{Group, LessonListing, NavigationError, Screen, View};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::{ErrorBody, HttpError};
use crate::web::middleware::{clear_session_cookie, client_session, session_token};
use crate::web::admin::ChapterLessonsDto;
use crate::web::rest::{chapter_lessons_dtos, lesson_dtos, parse_group, ChapterDto, LessonDto, SubjectDto};
use crate::web::state::AppState;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ViewDto {
    Home,
    Chapter {
        chapter_id: String,
    },
    Subject {
        chapter_id: String,
        subject_id: String,
        group: String,
    },
    AdminLogin,
    AdminDashboard,
}

impl From<&View> for ViewDto {
    fn from(view: &View) -> Self {
        match view {
            View::Home => ViewDto::Home,
            View::Chapter { chapter_id } => ViewDto::Chapter {
                chapter_id: chapter_id.clone(),
            },
            View::Subject {
                chapter_id,
                subject_id,
                group,
            } => ViewDto::Subject {
                chapter_id: chapter_id.clone(),
                subject_id: subject_id.clone(),
                group: group.to_string(),
            },
            View::AdminLogin => ViewDto::AdminLogin,
            View::AdminDashboard => ViewDto::AdminDashboard,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum ScreenDto {
    ChapterSelection {
        chapters: Vec<ChapterDto>,
    },
    SubjectSelection {
        chapter: ChapterDto,
        groups: Vec<String>,
        selected_group: String,
    },
    LessonList {
        chapter: ChapterDto,
        subject: SubjectDto,
        group: String,
        /// Absent when the lessons could not be loaded.
        lessons: Option<Vec<LessonDto>>,
        unavailable: Option<String>,
    },
    AdminLogin {
        groups: Vec<String>,
    },
    AdminDashboard {
        group: String,
        chapters: Vec<ChapterLessonsDto>,
        unavailable: Option<String>,
    },
}

fn group_names(groups: &[Group]) -> Vec<String> {
    groups.iter().map(|g| g.to_string()).collect()
}

impl From<Screen> for ScreenDto {
    fn from(screen: Screen) -> Self {
        match screen {
            Screen::ChapterSelection { chapters } => ScreenDto::ChapterSelection {
                chapters: chapters.iter().map(ChapterDto::from).collect(),
            },
            Screen::SubjectSelection {
                chapter,
                groups,
                selected_group,
            } => ScreenDto::SubjectSelection {
                chapter: ChapterDto::from(&chapter),
                groups: group_names(&groups),
                selected_group: selected_group.to_string(),
            },
            Screen::LessonList {
                chapter,
                subject,
                group,
                lessons,
            } => {
                let (lessons, unavailable) = match lessons {
                    LessonListing::Loaded(lessons) => (Some(lesson_dtos(lessons)), None),
                    LessonListing::Unavailable(message) => (None, Some(message)),
                };
                ScreenDto::LessonList {
                    chapter: ChapterDto::from(&chapter),
                    subject: SubjectDto {
                        id: subject.id,
                        name: subject.name,
                    },
                    group: group.to_string(),
                    lessons,
                    unavailable,
                }
            }
            Screen::AdminLogin { groups } => ScreenDto::AdminLogin {
                groups: group_names(&groups),
            },
            Screen::AdminDashboard {
                group,
                chapters,
                unavailable,
            } => ScreenDto::AdminDashboard {
                group: group.to_string(),
                chapters: chapter_lessons_dtos(chapters),
                unavailable,
            },
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ViewResponse {
    pub view: ViewDto,
    pub selected_group: String,
    pub screen: ScreenDto,
}

/// One navigation step.
#[derive(Deserialize, Serialize, ToSchema, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NavigationRequest {
    SelectChapter { chapter_id: String },
    SelectGroup { group: String },
    SelectSubject { subject_id: String },
    Back,
    OpenAdminLogin,
    LoginSucceeded,
    /// Ends the calling client's administrator session and returns home.
    Logout,
    Home,
}

//=========================================================================================
// Handlers
//=========================================================================================

async fn current_view(state: &AppState, headers: &HeaderMap) -> ViewResponse {
    let navigator = state.navigator.lock().await.clone();
    let session_group = client_session(state, headers).await.map(|s| s.group);
    let screen = navigator.dispatch(&state.queries, session_group).await;
    ViewResponse {
        view: ViewDto::from(navigator.view()),
        selected_group: navigator.selected_group().to_string(),
        screen: ScreenDto::from(screen),
    }
}

/// The current view and its screen, as seen by the calling client.
#[utoipa::path(
    get,
    path = "/view",
    responses((status = 200, description = "Current view", body = ViewResponse))
)]
pub async fn get_view_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<ViewResponse> {
    Json(current_view(&state, &headers).await)
}

/// Apply a navigation step and return the resulting view.
#[utoipa::path(
    post,
    path = "/view",
    request_body = NavigationRequest,
    responses(
        (status = 200, description = "Resulting view", body = ViewResponse),
        (status = 400, description = "Unknown chapter, subject or group", body = ErrorBody)
    )
)]
pub async fn navigate_handler(
    State(state): State<Arc<AppState>>,
    mut headers: HeaderMap,
    Json(req): Json<NavigationRequest>,
) -> Result<Response, HttpError> {
    let logging_out = matches!(req, NavigationRequest::Logout);
    if logging_out {
        if let Some(token) = session_token(&headers) {
            state.sessions.logout(token).await;
        }
        headers.remove(header::COOKIE);
    }

    {
        let mut navigator = state.navigator.lock().await;
        match req {
            NavigationRequest::SelectChapter { chapter_id } => {
                navigator.select_chapter(&chapter_id).map_err(navigation_error)?
            }
            NavigationRequest::SelectGroup { group } => navigator.select_group(parse_group(&group)?),
            NavigationRequest::SelectSubject { subject_id } => {
                navigator.select_subject(&subject_id).map_err(navigation_error)?
            }
            NavigationRequest::Back => navigator.back(),
            NavigationRequest::OpenAdminLogin => navigator.open_admin_login(),
            NavigationRequest::LoginSucceeded => navigator.login_succeeded(),
            NavigationRequest::Logout => navigator.logout(),
            NavigationRequest::Home => navigator.home(),
        }
    }

    let body = Json(current_view(&state, &headers).await);
    if logging_out {
        let cookie = clear_session_cookie(state.config.secure_cookies);
        return Ok(([(header::SET_COOKIE, cookie)], body).into_response());
    }
    Ok(body.into_response())
}

fn navigation_error(err: NavigationError) -> HttpError {
    let kind = match err {
        NavigationError::UnknownChapter(_) => "unknown_chapter",
        NavigationError::UnknownSubject { .. } => "unknown_subject",
        NavigationError::NoChapterSelected => "no_chapter_selected",
    };
    HttpError::bad_request(kind, err.to_string())
}
