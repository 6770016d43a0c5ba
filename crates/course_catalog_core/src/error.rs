//! crates/course_catalog_core/src/error.rs
//!
//! The error taxonomy of the core services. Each variant is caught at the
//! operation boundary and turned into a localized message for the user.

use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Wrong password for group")]
    Auth,

    #[error("No administrator is logged in")]
    NotAuthenticated,

    #[error("The uploaded file is empty")]
    EmptyFile,

    #[error("Invalid file name: {0}")]
    InvalidFileName(&'static str),

    #[error("Unknown chapter/subject: {chapter_id}/{subject_id}")]
    UnknownScope {
        chapter_id: String,
        subject_id: String,
    },

    #[error("Only PDF files are accepted")]
    NotPdf,

    #[error("File of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("Blob upload failed: {0}")]
    Upload(#[source] PortError),

    #[error("Metadata write failed: {0}")]
    Metadata(#[source] PortError),

    #[error("Lesson deletion failed: {0}")]
    Delete(#[source] PortError),

    #[error("Lesson not found: {0}")]
    LessonNotFound(String),

    #[error("Document fetch failed: {0}")]
    Fetch(#[source] PortError),

    #[error("Document render failed: {0}")]
    Render(String),

    #[error("Lesson data unavailable: {0}")]
    Unavailable(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

impl CatalogError {
    /// A stable machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::Auth => "auth",
            CatalogError::NotAuthenticated => "not_authenticated",
            CatalogError::EmptyFile => "empty_file",
            CatalogError::InvalidFileName(_) => "invalid_file_name",
            CatalogError::UnknownScope { .. } => "unknown_scope",
            CatalogError::NotPdf => "not_pdf",
            CatalogError::TooLarge { .. } => "too_large",
            CatalogError::Upload(_) => "upload",
            CatalogError::Metadata(_) => "metadata",
            CatalogError::Delete(_) => "delete",
            CatalogError::LessonNotFound(_) => "lesson_not_found",
            CatalogError::Fetch(_) => "fetch",
            CatalogError::Render(_) => "render",
            CatalogError::Unavailable(_) => "unavailable",
        }
    }

    /// The message shown to the user. Create-path failures share one generic
    /// message; the detail only goes to the logs.
    pub fn user_message(&self) -> String {
        let message = match self {
            CatalogError::Auth => "كلمة المرور غير صحيحة.",
            CatalogError::NotAuthenticated => "يرجى تسجيل الدخول أولاً.",
            CatalogError::EmptyFile
            | CatalogError::InvalidFileName(_)
            | CatalogError::UnknownScope { .. }
            | CatalogError::NotPdf => "يرجى اختيار ملف PDF فقط.",
            CatalogError::TooLarge { limit, .. } => {
                return format!(
                    "حجم الملف يجب أن يكون أقل من {} ميغابايت.",
                    limit.div_ceil(1024 * 1024)
                )
            }
            CatalogError::Upload(_) | CatalogError::Metadata(_) => "حدث خطأ أثناء الرفع.",
            CatalogError::Delete(_) | CatalogError::LessonNotFound(_) => "فشل حذف الدرس.",
            CatalogError::Fetch(_) | CatalogError::Render(_) => "فشل عرض الملف",
            CatalogError::Unavailable(_) => "فشل في تحميل الدروس.",
        };
        message.to_string()
    }
}
