//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `MetadataStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Live queries rely on the `lessons_changed` trigger: each insert or delete
//! notifies the affected group, and every open query for that group re-runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_catalog_core::domain::{Group, Lesson, LessonQuery, LessonRecord};
use course_catalog_core::ports::{LiveQuery, MetadataStore, PortError, PortResult};
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

/// The channel the `lessons` trigger notifies on.
pub const LESSONS_CHANNEL: &str = "lessons_changed";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `MetadataStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct LessonRow {
    id: Uuid,
    name: String,
    file_url: String,
    storage_path: String,
    chapter_id: String,
    subject_id: String,
    group_id: String,
    created_at: DateTime<Utc>,
}

impl LessonRow {
    fn to_domain(self) -> PortResult<Lesson> {
        let group = self
            .group_id
            .parse::<Group>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Lesson {
            id: self.id,
            name: self.name,
            file_url: self.file_url,
            storage_path: self.storage_path,
            chapter_id: self.chapter_id,
            subject_id: self.subject_id,
            group,
            created_at: self.created_at,
        })
    }
}

const LESSON_COLUMNS: &str =
    "id, name, file_url, storage_path, chapter_id, subject_id, group_id, created_at";

async fn fetch_matching(pool: &PgPool, query: &LessonQuery) -> PortResult<Vec<Lesson>> {
    let (chapter_id, subject_id) = match &query.scope {
        Some(scope) => (Some(scope.chapter_id.as_str()), Some(scope.subject_id.as_str())),
        None => (None, None),
    };
    let sql = format!(
        "SELECT {} FROM lessons \
         WHERE group_id = $1 AND ($2::text IS NULL OR (chapter_id = $2 AND subject_id = $3)) \
         ORDER BY created_at DESC",
        LESSON_COLUMNS
    );
    let rows: Vec<LessonRow> = sqlx::query_as(&sql)
        .bind(query.group.as_str())
        .bind(chapter_id)
        .bind(subject_id)
        .fetch_all(pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

    rows.into_iter().map(LessonRow::to_domain).collect()
}

//=========================================================================================
// `MetadataStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MetadataStore for DbAdapter {
    async fn live_query(&self, query: LessonQuery) -> PortResult<LiveQuery> {
        // Listen before the first read so no change between the two is missed.
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        listener
            .listen(LESSONS_CHANNEL)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let pool = self.pool.clone();
        let stream = async_stream::stream! {
            let mut first = true;
            loop {
                if !first {
                    match listener.try_recv().await {
                        Ok(Some(notification)) if notification.payload() != query.group.as_str() => {
                            continue;
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            warn!("Lost the '{}' listener connection", LESSONS_CHANNEL);
                            yield Err(PortError::Unexpected(
                                "lost connection to the change feed".to_string(),
                            ));
                            break;
                        }
                        Err(e) => {
                            yield Err(PortError::Unexpected(e.to_string()));
                            break;
                        }
                    }
                }
                first = false;

                match fetch_matching(&pool, &query).await {
                    Ok(lessons) => {
                        debug!("Live query {:?} matched {} lessons", query, lessons.len());
                        yield Ok(lessons);
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn insert_lesson(&self, record: LessonRecord) -> PortResult<Lesson> {
        let sql = format!(
            "INSERT INTO lessons (id, name, file_url, storage_path, chapter_id, subject_id, group_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            LESSON_COLUMNS
        );
        let row: LessonRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(&record.name)
            .bind(&record.file_url)
            .bind(&record.storage_path)
            .bind(&record.chapter_id)
            .bind(&record.subject_id)
            .bind(record.group.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) => PortError::Rejected(db.to_string()),
                _ => PortError::Unexpected(e.to_string()),
            })?;
        row.to_domain()
    }

    async fn delete_lesson(&self, id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM lessons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
