//! Change extraction from the PostgreSQL `content` schema
//!
//! A film work counts as changed when the film work itself, one of its
//! genres, or one of its people was modified. Its `modified` value is the
//! latest of those timestamps, so every row of one film work carries the same
//! value. Pages come back ordered by `(modified, id)`.
//!
//! Paging is keyset based: each page starts strictly after the `(modified,
//! id)` of the last row already processed. A row edited while a pass drains
//! moves behind the cursor's future pages instead of shifting rows out of
//! reach, and rows sharing one timestamp across a page boundary are never
//! skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PostgresSettings;
use crate::error::{EtlError, Result};
use crate::models::ChangedRow;

/// Position in the `(modified, id)` ordering; pages resume strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub modified: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(modified: DateTime<Utc>, id: Uuid) -> Self {
        Self { modified, id }
    }

    /// Everything modified strictly after `watermark`.
    pub fn after_watermark(watermark: DateTime<Utc>) -> Self {
        Self::new(watermark, Uuid::from_u128(u128::MAX))
    }

    pub fn of(row: &ChangedRow) -> Self {
        Self::new(row.modified, row.id)
    }
}

/// Which slice of the change stream to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// `None` = from the very beginning
    pub after: Option<Cursor>,
    pub limit: i64,
}

impl PageQuery {
    pub fn first(limit: i64) -> Self {
        Self { after: None, limit }
    }

    pub fn after(cursor: Cursor, limit: i64) -> Self {
        Self {
            after: Some(cursor),
            limit,
        }
    }
}

/// Source of changed rows.
///
/// An empty page is a normal answer: caught up (incremental) or no data
/// (full scan).
#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<ChangedRow>>;
}

const CHANGED_FILM_WORKS: &str = r#"
WITH touched AS (
    SELECT fw.id, fw.modified
    FROM content.film_work fw
    UNION ALL
    SELECT gfw.film_work_id, g.modified
    FROM content.genre g
    JOIN content.genre_film_work gfw ON gfw.genre_id = g.id
    UNION ALL
    SELECT pfw.film_work_id, p.modified
    FROM content.person p
    JOIN content.person_film_work pfw ON pfw.person_id = p.id
),
latest AS (
    SELECT id, max(modified) AS modified
    FROM touched
    GROUP BY id
)
SELECT
    fw.id,
    fw.rating,
    array_agg(DISTINCT g.name)::text[] AS genre,
    fw.title,
    fw.description,
    latest.modified,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object(
            'person_role', pfw.role,
            'person_id', p.id,
            'person_name', p.full_name
        )) FILTER (WHERE p.id IS NOT NULL),
        '[]'
    ) AS persons
FROM latest
JOIN content.film_work fw ON fw.id = latest.id
LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
LEFT JOIN content.person p ON p.id = pfw.person_id
LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
LEFT JOIN content.genre g ON g.id = gfw.genre_id
GROUP BY fw.id, latest.modified
"#;

pub fn first_page_sql() -> String {
    format!(
        "SELECT * FROM ({}) AS changed ORDER BY modified, id LIMIT $1",
        CHANGED_FILM_WORKS
    )
}

pub fn next_page_sql() -> String {
    format!(
        "SELECT * FROM ({}) AS changed WHERE (modified, id) > ($1, $2) ORDER BY modified, id LIMIT $3",
        CHANGED_FILM_WORKS
    )
}

/// Reads changed film works over one lazily opened connection.
///
/// The connection is opened on the first fetch and reused. After a failed
/// query it is dropped, so the next attempt starts from a fresh connection.
pub struct PostgresExtractor {
    options: PgConnectOptions,
    conn: Mutex<Option<PgConnection>>,
    first_sql: String,
    next_sql: String,
}

impl PostgresExtractor {
    pub fn new(settings: &PostgresSettings) -> Self {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.db_name);

        Self {
            options,
            conn: Mutex::new(None),
            first_sql: first_page_sql(),
            next_sql: next_page_sql(),
        }
    }

    async fn connect(&self) -> Result<PgConnection> {
        info!(
            host = self.options.get_host(),
            port = self.options.get_port(),
            "opening postgres connection"
        );
        Ok(PgConnection::connect_with(&self.options).await?)
    }
}

#[async_trait]
impl ChangeSource for PostgresExtractor {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<ChangedRow>> {
        let mut slot = self.conn.lock().await;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        let fetched = match query.after {
            Some(cursor) => {
                sqlx::query_as::<_, ChangedRow>(&self.next_sql)
                    .bind(cursor.modified)
                    .bind(cursor.id)
                    .bind(query.limit)
                    .fetch_all(&mut conn)
                    .await
            }
            None => {
                sqlx::query_as::<_, ChangedRow>(&self.first_sql)
                    .bind(query.limit)
                    .fetch_all(&mut conn)
                    .await
            }
        };

        // on error `conn` is dropped here and the slot stays empty
        let rows = fetched?;
        *slot = Some(conn);

        ensure_ordered(&rows)?;
        debug!(
            after = ?query.after,
            rows = rows.len(),
            "page fetched"
        );
        Ok(rows)
    }
}

/// Pages must be strictly increasing in `(modified, id)`; the cursor relies on it.
pub fn ensure_ordered(rows: &[ChangedRow]) -> Result<()> {
    match rows.windows(2).find(|w| Cursor::of(&w[1]) <= Cursor::of(&w[0])) {
        Some(w) => Err(EtlError::Ordering(format!(
            "{} ({}) precedes {} ({})",
            w[0].id, w[0].modified, w[1].id, w[1].modified
        ))),
        None => Ok(()),
    }
}
