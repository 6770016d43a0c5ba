//! crates/course_catalog_core/src/catalog.rs
//!
//! The catalog query service: live, ordered views over the lessons of a
//! group, optionally narrowed to one chapter subject.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{sort_newest_first, Catalog, Lesson, LessonFilter, LessonQuery};
use crate::error::{CatalogError, CatalogResult};
use crate::ports::MetadataStore;

const DEFAULT_BUFFER: usize = 16;

/// One delivery of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEvent {
    /// The full matching set, newest first. Supersedes every earlier snapshot.
    Snapshot(Vec<Lesson>),
    /// The live connection failed. Nothing follows this event.
    Unavailable(String),
}

//=========================================================================================
// Subscription
//=========================================================================================

/// A cancelable stream of snapshots. Dropping it cancels it.
pub struct Subscription {
    events: mpsc::Receiver<SnapshotEvent>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Waits for the next delivery. `None` once the subscription has ended.
    pub async fn next_event(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    /// Stops deliveries and releases the underlying live query.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the forwarding task has let go of the live query.
    pub fn is_released(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for Subscription {
    type Item = SnapshotEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

//=========================================================================================
// Catalog Query Service
//=========================================================================================

#[derive(Clone)]
pub struct CatalogQueryService {
    store: Arc<dyn MetadataStore>,
    buffer: usize,
}

impl CatalogQueryService {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Opens a live view over the lessons matching `filter`.
    ///
    /// Returns `None`, without touching the store, when the filter carries no
    /// group. Must be called from within a tokio runtime.
    pub fn subscribe(&self, filter: &LessonFilter) -> Option<Subscription> {
        let Some(query) = filter.to_query() else {
            debug!("Not subscribing: filter has no group");
            return None;
        };

        let (tx, rx) = mpsc::channel(self.buffer);
        let token = CancellationToken::new();
        let task = tokio::spawn(forward(self.store.clone(), query, tx, token.clone()));

        Some(Subscription {
            events: rx,
            token,
            task,
        })
    }

    /// The current matching set, taken from a short-lived subscription.
    pub async fn snapshot(&self, filter: &LessonFilter) -> Option<CatalogResult<Vec<Lesson>>> {
        let mut subscription = self.subscribe(filter)?;
        let result = match subscription.next_event().await {
            Some(SnapshotEvent::Snapshot(lessons)) => Ok(lessons),
            Some(SnapshotEvent::Unavailable(reason)) => Err(CatalogError::Unavailable(reason)),
            None => Err(CatalogError::Unavailable("live query closed".to_string())),
        };
        subscription.cancel();
        Some(result)
    }
}

/// Sends one event unless the subscription is cancelled first.
async fn deliver(
    tx: &mpsc::Sender<SnapshotEvent>,
    token: &CancellationToken,
    event: SnapshotEvent,
) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn forward(
    store: Arc<dyn MetadataStore>,
    query: LessonQuery,
    tx: mpsc::Sender<SnapshotEvent>,
    token: CancellationToken,
) {
    let opened = tokio::select! {
        _ = token.cancelled() => return,
        opened = store.live_query(query.clone()) => opened,
    };
    let mut live = match opened {
        Ok(live) => live,
        Err(e) => {
            warn!("Failed to open live query for {:?}: {}", query, e);
            deliver(&tx, &token, SnapshotEvent::Unavailable(e.to_string())).await;
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            _ = tx.closed() => break,
            next = live.next() => next,
        };

        match next {
            Some(Ok(mut lessons)) => {
                sort_newest_first(&mut lessons);
                if !deliver(&tx, &token, SnapshotEvent::Snapshot(lessons)).await {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Live query for {:?} failed: {}", query, e);
                deliver(&tx, &token, SnapshotEvent::Unavailable(e.to_string())).await;
                break;
            }
            None => break,
        }
    }
    debug!("Released live query for {:?}", query);
}

//=========================================================================================
// Consumer-side Grouping
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectLessons {
    pub subject_id: String,
    pub subject_name: String,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLessons {
    pub chapter_id: String,
    pub chapter_name: String,
    pub subjects: Vec<SubjectLessons>,
}

/// Groups a flat, already ordered snapshot by chapter and subject for the
/// administrator's dashboard. Every chapter is listed; subjects without
/// lessons are left out.
pub fn group_by_subject(catalog: &Catalog, lessons: &[Lesson]) -> Vec<ChapterLessons> {
    catalog
        .chapters
        .iter()
        .map(|chapter| ChapterLessons {
            chapter_id: chapter.id.clone(),
            chapter_name: chapter.name.clone(),
            subjects: chapter
                .subjects
                .iter()
                .filter_map(|subject| {
                    let matching: Vec<Lesson> = lessons
                        .iter()
                        .filter(|l| l.chapter_id == chapter.id && l.subject_id == subject.id)
                        .cloned()
                        .collect();
                    (!matching.is_empty()).then(|| SubjectLessons {
                        subject_id: subject.id.clone(),
                        subject_name: subject.name.clone(),
                        lessons: matching,
                    })
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Group, LessonRecord};
    use crate::memory::MemoryMetadataStore;
    use std::time::Duration;

    fn record(chapter: &str, subject: &str, group: Group, name: &str) -> LessonRecord {
        LessonRecord {
            name: name.to_string(),
            file_url: format!("memory://{name}"),
            storage_path: format!("lessons/{chapter}/{subject}/{group}/{name}"),
            chapter_id: chapter.to_string(),
            subject_id: subject.to_string(),
            group,
        }
    }

    async fn next_snapshot(subscription: &mut Subscription) -> Vec<Lesson> {
        match tokio::time::timeout(Duration::from_secs(2), subscription.next_event()).await {
            Ok(Some(SnapshotEvent::Snapshot(lessons))) => lessons,
            other => panic!("expected a snapshot, got {:?}", other),
        }
    }

    async fn wait_until_released(store: &MemoryMetadataStore) {
        for _ in 0..100 {
            if store.active_live_queries() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("live query was never released");
    }

    #[tokio::test]
    async fn scoped_subscription_delivers_matching_subset_newest_first() {
        let store = Arc::new(MemoryMetadataStore::new());
        for (chapter, subject, group, name) in [
            ("chapter5", "civ", Group::G1, "old.pdf"),
            ("chapter5", "civ", Group::G2, "other-group.pdf"),
            ("chapter5", "mrs", Group::G1, "other-subject.pdf"),
            ("chapter6", "civ", Group::G1, "other-chapter.pdf"),
            ("chapter5", "civ", Group::G1, "new.pdf"),
        ] {
            store
                .insert_lesson(record(chapter, subject, group, name))
                .await
                .unwrap();
        }

        let service = CatalogQueryService::new(store.clone());
        let mut subscription = service
            .subscribe(&LessonFilter::scoped("chapter5", "civ", Group::G1))
            .unwrap();

        let names: Vec<String> = next_snapshot(&mut subscription)
            .await
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["new.pdf", "old.pdf"]);
    }

    #[tokio::test]
    async fn group_filter_sees_every_subject_of_the_group() {
        let store = Arc::new(MemoryMetadataStore::new());
        store
            .insert_lesson(record("chapter5", "civ", Group::G3, "a.pdf"))
            .await
            .unwrap();
        store
            .insert_lesson(record("chapter6", "atelier", Group::G3, "b.pdf"))
            .await
            .unwrap();
        store
            .insert_lesson(record("chapter6", "atelier", Group::G1, "c.pdf"))
            .await
            .unwrap();

        let service = CatalogQueryService::new(store);
        let lessons = service
            .snapshot(&LessonFilter::whole_group(Some(Group::G3)))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<&str> = lessons.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["b.pdf", "a.pdf"]);
    }

    #[tokio::test]
    async fn no_group_means_no_subscription() {
        let store = Arc::new(MemoryMetadataStore::new());
        let service = CatalogQueryService::new(store.clone());

        assert!(service.subscribe(&LessonFilter::whole_group(None)).is_none());
        assert!(service.snapshot(&LessonFilter::whole_group(None)).await.is_none());
        assert_eq!(store.active_live_queries(), 0);
    }

    #[tokio::test]
    async fn inserts_and_deletes_are_pushed() {
        let store = Arc::new(MemoryMetadataStore::new());
        let service = CatalogQueryService::new(store.clone());
        let mut subscription = service
            .subscribe(&LessonFilter::scoped("chapter5", "civ", Group::G1))
            .unwrap();
        assert!(next_snapshot(&mut subscription).await.is_empty());

        let lesson = store
            .insert_lesson(record("chapter5", "civ", Group::G1, "cours1.pdf"))
            .await
            .unwrap();
        let after_insert = next_snapshot(&mut subscription).await;
        assert_eq!(after_insert, vec![lesson.clone()]);

        store.delete_lesson(lesson.id).await.unwrap();
        assert!(next_snapshot(&mut subscription).await.is_empty());
    }

    #[tokio::test]
    async fn cancel_releases_the_live_query() {
        let store = Arc::new(MemoryMetadataStore::new());
        let service = CatalogQueryService::new(store.clone());
        let mut subscription = service
            .subscribe(&LessonFilter::whole_group(Some(Group::G1)))
            .unwrap();
        next_snapshot(&mut subscription).await;
        assert_eq!(store.active_live_queries(), 1);

        subscription.cancel();
        wait_until_released(&store).await;
        assert!(subscription.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_a_subscription_releases_it() {
        let store = Arc::new(MemoryMetadataStore::new());
        let service = CatalogQueryService::new(store.clone());
        let mut first = service
            .subscribe(&LessonFilter::whole_group(Some(Group::G1)))
            .unwrap();
        let mut second = service
            .subscribe(&LessonFilter::whole_group(Some(Group::G2)))
            .unwrap();
        next_snapshot(&mut first).await;
        next_snapshot(&mut second).await;
        assert_eq!(store.active_live_queries(), 2);

        drop(first);
        for _ in 0..100 {
            if store.active_live_queries() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.active_live_queries(), 1);

        // The other subscription keeps working.
        store
            .insert_lesson(record("chapter5", "civ", Group::G2, "x.pdf"))
            .await
            .unwrap();
        assert_eq!(next_snapshot(&mut second).await.len(), 1);
    }

    #[tokio::test]
    async fn connection_error_surfaces_as_unavailable() {
        let store = Arc::new(MemoryMetadataStore::new());
        let service = CatalogQueryService::new(store.clone());
        let mut subscription = service
            .subscribe(&LessonFilter::whole_group(Some(Group::G1)))
            .unwrap();
        next_snapshot(&mut subscription).await;

        store.break_live_queries("connection reset");
        assert_eq!(
            subscription.next_event().await,
            Some(SnapshotEvent::Unavailable(
                "An unexpected error occurred: connection reset".to_string()
            ))
        );
        assert_eq!(subscription.next_event().await, None);
        wait_until_released(&store).await;

        // A fresh subscription works again once the store recovers.
        store.restore_live_queries();
        let mut retry = service
            .subscribe(&LessonFilter::whole_group(Some(Group::G1)))
            .unwrap();
        assert!(next_snapshot(&mut retry).await.is_empty());
    }

    #[tokio::test]
    async fn refused_live_query_is_unavailable_not_empty() {
        let store = Arc::new(MemoryMetadataStore::new());
        store.fail_live_queries(true);
        let service = CatalogQueryService::new(store);

        let result = service
            .snapshot(&LessonFilter::whole_group(Some(Group::G1)))
            .await
            .unwrap();
        assert!(matches!(result, Err(CatalogError::Unavailable(_))));
    }

    #[tokio::test]
    async fn grouping_follows_catalog_order_and_skips_empty_subjects() {
        let store = Arc::new(MemoryMetadataStore::new());
        let first = store
            .insert_lesson(record("chapter6", "mrs", Group::G1, "one.pdf"))
            .await
            .unwrap();
        let second = store
            .insert_lesson(record("chapter5", "civ", Group::G1, "two.pdf"))
            .await
            .unwrap();
        let third = store
            .insert_lesson(record("chapter6", "mrs", Group::G1, "three.pdf"))
            .await
            .unwrap();

        let grouped = group_by_subject(
            &Catalog::standard(),
            &[third.clone(), second.clone(), first.clone()],
        );
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].chapter_id, "chapter5");
        assert_eq!(grouped[0].subjects.len(), 1);
        assert_eq!(grouped[0].subjects[0].lessons, vec![second]);
        assert_eq!(grouped[1].subjects[0].subject_id, "mrs");
        assert_eq!(grouped[1].subjects[0].lessons, vec![third, first]);
    }
}
