pub mod catalog;
pub mod domain;
pub mod error;
pub mod memory;
pub mod mutation;
pub mod navigation;
pub mod ports;
pub mod session;
pub mod thumbnail;

pub use catalog::{
    group_by_subject, CatalogQueryService, ChapterLessons, SnapshotEvent, SubjectLessons,
    Subscription,
};
pub use domain::{
    fit_height, Catalog, Chapter, Group, Lesson, LessonFilter, LessonQuery, LessonRecord,
    NewLesson, OrphanReason, OrphanedBlob, RasterImage, Subject, SubjectScope, UnknownGroup,
};
pub use error::{CatalogError, CatalogResult};
pub use mutation::{download_name, DeleteOutcome, LessonMutationService, UploadPolicy};
pub use navigation::{LessonListing, NavigationError, Navigator, Screen, View};
pub use ports::{
    BlobStore, DocumentFetcher, LiveQuery, LocalStorage, MetadataStore, PageRasterizer,
    PortError, PortResult,
};
pub use session::{
    ActiveSession, CredentialError, CredentialStore, SessionManager, SessionRegistry,
    SESSION_STORAGE_KEY, SESSION_TTL_DAYS,
};
pub use thumbnail::ThumbnailRenderer;
