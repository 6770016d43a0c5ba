//! crates/course_catalog_core/src/memory.rs
//!
//! In-process implementations of every port. They back the service's
//! `memory` store mode and the test suites, and can be told to fail on
//! demand so the partial-failure paths can be exercised.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::domain::{sort_newest_first, Lesson, LessonQuery, LessonRecord};
use crate::ports::{
    BlobStore, DocumentFetcher, LiveQuery, LocalStorage, MetadataStore, PortError, PortResult,
};

/// URL scheme used by [`MemoryBlobStore::resolve_url`].
pub const MEMORY_URL_PREFIX: &str = "memory://";

//=========================================================================================
// Metadata Store
//=========================================================================================

#[derive(Default)]
struct MetadataState {
    lessons: Vec<Lesson>,
    last_created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
struct ChangeSignal {
    version: u64,
    broken: Option<String>,
}

/// A metadata store with push-based live queries built on a `watch` channel.
pub struct MemoryMetadataStore {
    state: Arc<RwLock<MetadataState>>,
    signal: watch::Sender<ChangeSignal>,
    active_queries: Arc<AtomicUsize>,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
    fail_live_queries: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(ChangeSignal::default());
        Self {
            state: Arc::new(RwLock::new(MetadataState::default())),
            signal,
            active_queries: Arc::new(AtomicUsize::new(0)),
            fail_inserts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_live_queries: AtomicBool::new(false),
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Makes new live queries fail to open.
    pub fn fail_live_queries(&self, fail: bool) {
        self.fail_live_queries.store(fail, Ordering::SeqCst);
    }

    /// Breaks every open live query, as a dropped connection would.
    pub fn break_live_queries(&self, reason: &str) {
        self.signal.send_modify(|s| {
            s.version += 1;
            s.broken = Some(reason.to_string());
        });
    }

    /// Lets live queries opened from now on work again.
    pub fn restore_live_queries(&self) {
        self.signal.send_modify(|s| {
            s.version += 1;
            s.broken = None;
        });
    }

    /// Number of live query streams that have not been dropped yet.
    pub fn active_live_queries(&self) -> usize {
        self.active_queries.load(Ordering::SeqCst)
    }

    pub async fn lesson_count(&self) -> usize {
        self.state.read().await.lessons.len()
    }

    fn notify(&self) {
        self.signal.send_modify(|s| s.version += 1);
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the live query count when the owning stream is dropped.
struct ActiveQuery(Arc<AtomicUsize>);

impl ActiveQuery {
    fn register(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveQuery {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn matching(state: &RwLock<MetadataState>, query: &LessonQuery) -> Vec<Lesson> {
    let state = state.read().await;
    let mut lessons: Vec<Lesson> = state
        .lessons
        .iter()
        .filter(|l| query.matches(l))
        .cloned()
        .collect();
    sort_newest_first(&mut lessons);
    lessons
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn live_query(&self, query: LessonQuery) -> PortResult<LiveQuery> {
        if self.fail_live_queries.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("live query refused".to_string()));
        }

        let state = self.state.clone();
        let mut changes = self.signal.subscribe();
        let guard = ActiveQuery::register(&self.active_queries);

        let stream = async_stream::stream! {
            let _guard = guard;
            loop {
                let broken = changes.borrow_and_update().broken.clone();
                if let Some(reason) = broken {
                    yield Err(PortError::Unexpected(reason));
                    break;
                }
                yield Ok(matching(&state, &query).await);
                if changes.changed().await.is_err() {
                    break;
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn insert_lesson(&self, record: LessonRecord) -> PortResult<Lesson> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(PortError::Rejected("insert refused".to_string()));
        }

        let lesson = {
            let mut state = self.state.write().await;
            // Timestamps are strictly increasing so ordering is deterministic.
            let now = Utc::now();
            let created_at = match state.last_created_at {
                Some(last) if last >= now => last + Duration::microseconds(1),
                _ => now,
            };
            state.last_created_at = Some(created_at);

            let lesson = Lesson {
                id: Uuid::new_v4(),
                name: record.name,
                file_url: record.file_url,
                storage_path: record.storage_path,
                chapter_id: record.chapter_id,
                subject_id: record.subject_id,
                group: record.group,
                created_at,
            };
            state.lessons.push(lesson.clone());
            lesson
        };
        self.notify();
        Ok(lesson)
    }

    async fn delete_lesson(&self, id: Uuid) -> PortResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(PortError::Rejected("delete refused".to_string()));
        }

        let removed = {
            let mut state = self.state.write().await;
            let before = state.lessons.len();
            state.lessons.retain(|l| l.id != id);
            state.lessons.len() != before
        };
        if removed {
            self.notify();
        }
        Ok(())
    }
}

//=========================================================================================
// Blob Store
//=========================================================================================

/// A blob store keeping files in memory. Its URLs use the `memory://` scheme
/// and are served back by its [`DocumentFetcher`] implementation.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.read().await.contains_key(path)
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, data: Bytes) -> PortResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(PortError::Rejected("quota exceeded".to_string()));
        }
        self.blobs.write().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn resolve_url(&self, path: &str) -> PortResult<String> {
        if !self.contains(path).await {
            return Err(PortError::NotFound(path.to_string()));
        }
        Ok(format!("{}{}", MEMORY_URL_PREFIX, path))
    }

    async fn delete(&self, path: &str) -> PortResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("blob store unreachable".to_string()));
        }
        self.blobs.write().await.remove(path);
        Ok(())
    }

    async fn read(&self, path: &str) -> PortResult<Bytes> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| PortError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl DocumentFetcher for MemoryBlobStore {
    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        let path = url
            .strip_prefix(MEMORY_URL_PREFIX)
            .ok_or_else(|| PortError::NotFound(url.to_string()))?;
        self.read(path).await
    }
}

//=========================================================================================
// Local Storage
//=========================================================================================

#[derive(Default)]
pub struct MemoryLocalStorage {
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> PortResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("storage is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStorage for MemoryLocalStorage {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        self.check_writable()?;
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        self.check_writable()?;
        self.values.lock().await.remove(key);
        Ok(())
    }
}
