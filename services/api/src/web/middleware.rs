//! services/api/src/web/middleware.rs
//!
//! Session cookie handling and the middleware protecting the administrator
//! routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use course_catalog_core::{ActiveSession, CatalogError, Group, SESSION_TTL_DAYS};
use std::sync::Arc;

use crate::error::HttpError;
use crate::web::state::AppState;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// The group the request acts on, taken from the client's session.
#[derive(Clone, Copy, Debug)]
pub struct AdminGroup(pub Group);

/// The session token in the request's cookies, if any.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|c| {
            let (name, value) = c.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
        })
}

/// Resolves the calling client's live session.
pub async fn client_session(state: &AppState, headers: &HeaderMap) -> Option<ActiveSession> {
    let token = session_token(headers)?;
    state.sessions.resolve(token).await
}

/// `Set-Cookie` value starting a session.
pub fn session_cookie(token: &str, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly;{} SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        token,
        if secure { " Secure;" } else { "" },
        chrono::Duration::days(SESSION_TTL_DAYS).num_seconds()
    )
}

/// `Set-Cookie` value removing the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly;{} SameSite=Lax; Path=/; Max-Age=0",
        SESSION_COOKIE,
        if secure { " Secure;" } else { "" }
    )
}

/// Middleware that requires an administrator session.
///
/// If the request's session cookie names a live session, inserts its group
/// into request extensions for handlers to use. Otherwise returns 401.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(session) = client_session(&state, req.headers()).await else {
        return HttpError::from(CatalogError::NotAuthenticated).into_response();
    };

    req.extensions_mut().insert(AdminGroup(session.group));
    next.run(req).await
}
