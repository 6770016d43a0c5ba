//! services/api/src/web/auth.rs
//!
//! Administrator login, logout and session lookup. Each client gets its own
//! session, carried in an HttpOnly cookie.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use course_catalog_core::{CatalogError, View};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::error::{ErrorBody, HttpError};
use crate::web::middleware::{clear_session_cookie, client_session, session_cookie, session_token};
use crate::web::rest::parse_group;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    /// One of G1, G2, G3.
    pub group: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct SessionResponse {
    /// The group this client is logged in as, absent when it is not.
    pub group: Option<String>,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/login - Log in as a group administrator
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; sets the session cookie", body = SessionResponse),
        (status = 401, description = "Wrong password", body = ErrorBody)
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let group = parse_group(&req.group)?;
    let Some(session) = state.sessions.login(group, &req.password).await else {
        return Err(CatalogError::Auth.into());
    };

    // A client logging in again gives up its previous session.
    if let Some(previous) = session_token(&headers) {
        state.sessions.logout(previous).await;
    }

    let mut navigator = state.navigator.lock().await;
    if navigator.view() == &View::AdminLogin {
        navigator.login_succeeded();
    }

    let cookie = session_cookie(&session.token, state.config.secure_cookies);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            group: Some(group.to_string()),
        }),
    ))
}

/// POST /auth/logout - End this client's administrator session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out; clears the session cookie"))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = session_token(&headers) {
        if let Some(group) = state.sessions.logout(token).await {
            info!("Session of {} ended through the API", group);
        }
    }

    let mut navigator = state.navigator.lock().await;
    if navigator.view() == &View::AdminDashboard {
        navigator.logout();
    }
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(state.config.secure_cookies))],
    )
}

/// GET /auth/session - The group this client is logged in as
#[utoipa::path(
    get,
    path = "/auth/session",
    responses((status = 200, description = "Current session", body = SessionResponse))
)]
pub async fn session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<SessionResponse> {
    Json(SessionResponse {
        group: client_session(&state, &headers)
            .await
            .map(|s| s.group.to_string()),
    })
}
