//! crates/course_catalog_core/src/domain.rs
//!
//! Defines the core data structures for the course catalog.
//! Lessons are the only dynamically persisted entity; groups, chapters and
//! subjects form the static catalog they are scoped by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Groups
//=========================================================================================

/// A student group. Identifies both an administrator's credential scope and a
/// content partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Group {
    G1,
    G2,
    G3,
}

impl Group {
    pub const ALL: [Group; 3] = [Group::G1, Group::G2, Group::G3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Group::G1 => "G1",
            Group::G2 => "G2",
            Group::G3 => "G3",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a known group")]
pub struct UnknownGroup(pub String);

impl FromStr for Group {
    type Err = UnknownGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Group::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| UnknownGroup(s.to_string()))
    }
}

//=========================================================================================
// Static Catalog
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub name: String,
    pub subjects: Vec<Subject>,
}

impl Chapter {
    pub fn subject(&self, subject_id: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == subject_id)
    }
}

/// The ordered set of chapters lessons can be filed under. Defined at build
/// time or loaded from a file at startup; never persisted in the stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub chapters: Vec<Chapter>,
}

const STANDARD_SUBJECTS: [(&str, &str); 10] = [
    ("civ", "CIV"),
    ("mrs", "MRS"),
    ("didactique", "Didactique"),
    ("litterature", "Littérature"),
    ("ceo", "CEO"),
    ("atelier", "Atelier"),
    ("linguistique", "Linguistique"),
    ("langue-de-spe", "Langue de spé"),
    ("traduction", "Traduction"),
    ("entrepreneuriat", "Entrepreneuriat"),
];

impl Catalog {
    /// The catalog the front end ships with: two chapters sharing one
    /// subject list.
    pub fn standard() -> Self {
        let subjects: Vec<Subject> = STANDARD_SUBJECTS
            .iter()
            .map(|(id, name)| Subject {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();

        Self {
            chapters: vec![
                Chapter {
                    id: "chapter5".to_string(),
                    name: "الفصل الخامس".to_string(),
                    subjects: subjects.clone(),
                },
                Chapter {
                    id: "chapter6".to_string(),
                    name: "الفصل السادس".to_string(),
                    subjects,
                },
            ],
        }
    }

    /// Parses a catalog from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }

    pub fn subject(&self, chapter_id: &str, subject_id: &str) -> Option<&Subject> {
        self.chapter(chapter_id)?.subject(subject_id)
    }

    pub fn contains(&self, chapter_id: &str, subject_id: &str) -> bool {
        self.subject(chapter_id, subject_id).is_some()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

//=========================================================================================
// Lessons
//=========================================================================================

/// An uploaded course document as seen through the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    pub id: Uuid,
    /// Original filename, also used as the download filename.
    pub name: String,
    pub file_url: String,
    /// Blob store handle; distinct from `file_url`.
    pub storage_path: String,
    pub chapter_id: String,
    pub subject_id: String,
    pub group: Group,
    pub created_at: DateTime<Utc>,
}

/// The fields written to the metadata store when a lesson is created.
/// The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonRecord {
    pub name: String,
    pub file_url: String,
    pub storage_path: String,
    pub chapter_id: String,
    pub subject_id: String,
    pub group: Group,
}

/// An upload request as handed to the mutation service.
#[derive(Debug, Clone)]
pub struct NewLesson {
    pub chapter_id: String,
    pub subject_id: String,
    pub group: Group,
    pub file_name: String,
    pub bytes: bytes::Bytes,
}

/// Sorts lessons newest first. The sort is stable, so lessons sharing a
/// timestamp keep the order the store delivered them in.
pub fn sort_newest_first(lessons: &mut [Lesson]) {
    lessons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

//=========================================================================================
// Queries
//=========================================================================================

/// A (chapter, subject) pair narrowing a group's lessons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectScope {
    pub chapter_id: String,
    pub subject_id: String,
}

/// What a caller asks the catalog for. The group may be absent when it comes
/// from an unauthenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonFilter {
    pub group: Option<Group>,
    pub scope: Option<SubjectScope>,
}

impl LessonFilter {
    /// The public lesson list for one subject of one chapter.
    pub fn scoped(chapter_id: &str, subject_id: &str, group: Group) -> Self {
        Self {
            group: Some(group),
            scope: Some(SubjectScope {
                chapter_id: chapter_id.to_string(),
                subject_id: subject_id.to_string(),
            }),
        }
    }

    /// Everything a group administrator owns.
    pub fn whole_group(group: Option<Group>) -> Self {
        Self { group, scope: None }
    }

    /// The store query for this filter, or `None` without a group.
    pub fn to_query(&self) -> Option<LessonQuery> {
        Some(LessonQuery {
            group: self.group?,
            scope: self.scope.clone(),
        })
    }
}

/// A fully scoped query as sent to the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LessonQuery {
    pub group: Group,
    pub scope: Option<SubjectScope>,
}

impl LessonQuery {
    pub fn matches(&self, lesson: &Lesson) -> bool {
        if lesson.group != self.group {
            return false;
        }
        match &self.scope {
            Some(scope) => {
                lesson.chapter_id == scope.chapter_id && lesson.subject_id == scope.subject_id
            }
            None => true,
        }
    }
}

//=========================================================================================
// Reconciliation
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// The blob was uploaded but its metadata record was never written.
    UploadedWithoutMetadata,
    /// The metadata record was deleted but the blob could not be.
    MetadataDeleted,
}

/// A blob no listing references any more, kept for later reclamation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedBlob {
    pub storage_path: String,
    pub reason: OrphanReason,
    pub detected_at: DateTime<Utc>,
}

//=========================================================================================
// Thumbnails
//=========================================================================================

/// A rendered page as straight RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Height of a page scaled to `target_width`, keeping its aspect ratio.
pub fn fit_height(page_width: f32, page_height: f32, target_width: u32) -> u32 {
    if page_width <= 0.0 || page_height <= 0.0 {
        return 1;
    }
    let scaled = page_height * target_width as f32 / page_width;
    (scaled.round() as u32).max(1)
}
