//! crates/course_catalog_core/src/navigation.rs
//!
//! Navigation state of the front end and the screen each state resolves to.

use std::sync::Arc;

use crate::catalog::{group_by_subject, CatalogQueryService, ChapterLessons};
use crate::domain::{Catalog, Chapter, Group, Lesson, LessonFilter, Subject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Home,
    Chapter {
        chapter_id: String,
    },
    Subject {
        chapter_id: String,
        subject_id: String,
        group: Group,
    },
    AdminLogin,
    AdminDashboard,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Unknown chapter: {0}")]
    UnknownChapter(String),
    #[error("Unknown subject {subject_id} in chapter {chapter_id}")]
    UnknownSubject {
        chapter_id: String,
        subject_id: String,
    },
    #[error("A subject can only be picked from a chapter view")]
    NoChapterSelected,
}

/// Lessons of a list screen. A failed load is not an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonListing {
    Loaded(Vec<Lesson>),
    Unavailable(String),
}

/// What the current view resolves to, with the data that screen shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    ChapterSelection {
        chapters: Vec<Chapter>,
    },
    SubjectSelection {
        chapter: Chapter,
        groups: Vec<Group>,
        selected_group: Group,
    },
    LessonList {
        chapter: Chapter,
        subject: Subject,
        group: Group,
        lessons: LessonListing,
    },
    AdminLogin {
        groups: Vec<Group>,
    },
    AdminDashboard {
        group: Group,
        chapters: Vec<ChapterLessons>,
        unavailable: Option<String>,
    },
}

/// The view the front end is on plus the group picked on the subject screen.
#[derive(Debug, Clone)]
pub struct Navigator {
    catalog: Arc<Catalog>,
    view: View,
    selected_group: Group,
}

impl Navigator {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            view: View::Home,
            selected_group: Group::G1,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn selected_group(&self) -> Group {
        self.selected_group
    }

    pub fn select_chapter(&mut self, chapter_id: &str) -> Result<(), NavigationError> {
        if self.catalog.chapter(chapter_id).is_none() {
            return Err(NavigationError::UnknownChapter(chapter_id.to_string()));
        }
        self.view = View::Chapter {
            chapter_id: chapter_id.to_string(),
        };
        Ok(())
    }

    pub fn select_group(&mut self, group: Group) {
        self.selected_group = group;
    }

    /// Opens the lesson list of a subject of the current chapter for the
    /// selected group.
    pub fn select_subject(&mut self, subject_id: &str) -> Result<(), NavigationError> {
        let View::Chapter { chapter_id } = &self.view else {
            return Err(NavigationError::NoChapterSelected);
        };
        if self.catalog.subject(chapter_id, subject_id).is_none() {
            return Err(NavigationError::UnknownSubject {
                chapter_id: chapter_id.clone(),
                subject_id: subject_id.to_string(),
            });
        }
        self.view = View::Subject {
            chapter_id: chapter_id.clone(),
            subject_id: subject_id.to_string(),
            group: self.selected_group,
        };
        Ok(())
    }

    pub fn back(&mut self) {
        self.view = match &self.view {
            View::Subject { chapter_id, .. } => View::Chapter {
                chapter_id: chapter_id.clone(),
            },
            _ => View::Home,
        };
    }

    pub fn open_admin_login(&mut self) {
        self.view = View::AdminLogin;
    }

    pub fn login_succeeded(&mut self) {
        self.view = View::AdminDashboard;
    }

    pub fn logout(&mut self) {
        self.view = View::Home;
    }

    pub fn home(&mut self) {
        self.view = View::Home;
    }

    /// Resolves the current view into its screen. The dashboard needs the
    /// caller's session group; without one it resolves to the login screen.
    pub async fn dispatch(
        &self,
        queries: &CatalogQueryService,
        session_group: Option<Group>,
    ) -> Screen {
        match &self.view {
            View::Home => self.chapter_selection(),
            View::Chapter { chapter_id } => match self.catalog.chapter(chapter_id) {
                Some(chapter) => Screen::SubjectSelection {
                    chapter: chapter.clone(),
                    groups: Group::ALL.to_vec(),
                    selected_group: self.selected_group,
                },
                None => self.chapter_selection(),
            },
            View::Subject {
                chapter_id,
                subject_id,
                group,
            } => {
                let Some(chapter) = self.catalog.chapter(chapter_id) else {
                    return self.chapter_selection();
                };
                let Some(subject) = chapter.subject(subject_id) else {
                    return self.chapter_selection();
                };
                let filter = LessonFilter::scoped(chapter_id, subject_id, *group);
                let lessons = match queries.snapshot(&filter).await {
                    Some(Ok(lessons)) => LessonListing::Loaded(lessons),
                    Some(Err(e)) => LessonListing::Unavailable(e.user_message()),
                    None => LessonListing::Loaded(Vec::new()),
                };
                Screen::LessonList {
                    chapter: chapter.clone(),
                    subject: subject.clone(),
                    group: *group,
                    lessons,
                }
            }
            View::AdminLogin => Screen::AdminLogin {
                groups: Group::ALL.to_vec(),
            },
            View::AdminDashboard => {
                let Some(group) = session_group else {
                    return Screen::AdminLogin {
                        groups: Group::ALL.to_vec(),
                    };
                };
                let (lessons, unavailable) =
                    match queries.snapshot(&LessonFilter::whole_group(Some(group))).await {
                        Some(Ok(lessons)) => (lessons, None),
                        Some(Err(e)) => (Vec::new(), Some(e.user_message())),
                        None => (Vec::new(), None),
                    };
                Screen::AdminDashboard {
                    group,
                    chapters: group_by_subject(&self.catalog, &lessons),
                    unavailable,
                }
            }
        }
    }

    fn chapter_selection(&self) -> Screen {
        Screen::ChapterSelection {
            chapters: self.catalog.chapters.clone(),
        }
    }
}
