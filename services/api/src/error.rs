//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the JSON
//! error body handlers answer with.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use course_catalog_core::{session::CredentialError, CatalogError, PortError};
use serde::Serialize;
use utoipa::ToSchema;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Credential Error: {0}")]
    Credentials(#[from] CredentialError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

//=========================================================================================
// HTTP Error Responses
//=========================================================================================

/// The body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error kind, e.g. `upload` or `not_authenticated`.
    pub error: String,
    /// Localized message for display.
    pub message: String,
}

/// An error on its way out of a handler.
#[derive(Debug)]
pub enum HttpError {
    Catalog(CatalogError),
    /// A request the core never saw, e.g. an unparsable query parameter.
    Request {
        status: StatusCode,
        kind: &'static str,
        message: String,
    },
}

impl HttpError {
    pub fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            status: StatusCode::BAD_REQUEST,
            kind,
            message: message.into(),
        }
    }
}

impl From<CatalogError> for HttpError {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}

pub fn status_for(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::Auth | CatalogError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        CatalogError::EmptyFile
        | CatalogError::InvalidFileName(_)
        | CatalogError::UnknownScope { .. } => StatusCode::BAD_REQUEST,
        CatalogError::NotPdf => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        CatalogError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        CatalogError::LessonNotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::Fetch(_) | CatalogError::Render(_) => StatusCode::BAD_GATEWAY,
        CatalogError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CatalogError::Upload(_) | CatalogError::Metadata(_) | CatalogError::Delete(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            HttpError::Catalog(err) => (
                status_for(&err),
                ErrorBody {
                    error: err.kind().to_string(),
                    message: err.user_message(),
                },
            ),
            HttpError::Request {
                status,
                kind,
                message,
            } => (
                status,
                ErrorBody {
                    error: kind.to_string(),
                    message,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}
