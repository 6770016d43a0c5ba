pub mod admin;
pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod view;
pub mod ws_handler;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::require_session;
pub use ws_handler::ws_handler;

use axum::{
    extract::DefaultBodyLimit,
    http::{header::{ACCEPT, CONTENT_TYPE}, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::web::state::AppState;

/// Room for the multipart framing and the text fields around the file.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Builds the complete application router over a wired state.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);
    match app_state.config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(e) => warn!(
            "Ignoring invalid CORS origin '{}': {}",
            app_state.config.cors_origin, e
        ),
    }

    let upload_limit = usize::try_from(app_state.upload_policy.max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);

    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/catalog", get(rest::catalog_handler))
        .route("/lessons", get(rest::lessons_handler))
        .route("/thumbnails", get(rest::thumbnail_handler))
        .route("/files/{*path}", get(rest::file_handler))
        .route("/ws/lessons", get(ws_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/session", get(auth::session_handler))
        .route("/view", get(view::get_view_handler).post(view::navigate_handler));

    // Administrator routes (session required)
    let admin_routes = Router::new()
        .route(
            "/admin/lessons",
            get(admin::dashboard_handler).post(admin::upload_lesson_handler),
        )
        .route("/admin/lessons/{id}", delete(admin::delete_lesson_handler))
        .route("/admin/orphans", get(admin::orphans_handler))
        .route("/admin/orphans/reclaim", post(admin::reclaim_orphans_handler))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_session,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", rest::ApiDoc::openapi()))
}
