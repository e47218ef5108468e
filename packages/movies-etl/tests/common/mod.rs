//! Test doubles for the sync loop
//!
//! `FakeSource` answers page queries the way the PostgreSQL query does
//! (strictly after the cursor, `(modified, id)` order, limit).
//! `RecordingSink` keeps documents keyed by id like an index would.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use movies_etl::{
    BackoffPolicy, BulkOutcome, ChangeSource, ChangedRow, Checkpoint, Cursor, DocumentSink, EtlError,
    IndexDocument, IndexStatus, PageQuery, PersonRecord, PersonRole, Result, SyncLoop, SyncOptions,
};
use movies_state::{InMemoryStateStore, State, StateStore, StorageError};
use sqlx::types::Json;
use uuid::Uuid;

pub const IDLE: Duration = Duration::from_secs(60);

pub fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub fn film_id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// One film work row with a director and an actor.
pub fn film(n: u128, minutes: i64, title: &str) -> ChangedRow {
    ChangedRow {
        id: film_id(n),
        rating: Some(7.0),
        genre: vec![Some("Drama".into())],
        title: Some(title.into()),
        description: Some(format!("{} description", title)),
        modified: ts(minutes),
        persons: Json(vec![
            PersonRecord {
                person_role: PersonRole::Director,
                person_id: Uuid::from_u128(10_000 + n),
                person_name: format!("Director {}", n),
            },
            PersonRecord {
                person_role: PersonRole::Actor,
                person_id: Uuid::from_u128(20_000 + n),
                person_name: format!("Actor {}", n),
            },
        ]),
    }
}

/// Checkpoint written after indexing film `n` last modified at `minutes`
pub fn checkpoint_at(n: u128, minutes: i64) -> Checkpoint {
    Checkpoint::at(Cursor::new(ts(minutes), film_id(n)))
}

pub fn checkpoint_state(last_update: &str) -> State {
    let mut state = State::new();
    state.insert("last_update".into(), serde_json::Value::String(last_update.into()));
    state
}

pub fn transient_db_error() -> EtlError {
    EtlError::Database(sqlx::Error::PoolTimedOut)
}

pub fn unavailable_index() -> EtlError {
    EtlError::IndexResponse {
        status: 503,
        body: "cluster_block_exception".into(),
    }
}

#[derive(Default)]
pub struct FakeSource {
    rows: Mutex<Vec<ChangedRow>>,
    queries: Mutex<Vec<PageQuery>>,
    failures: AtomicUsize,
}

impl FakeSource {
    pub fn new(rows: Vec<ChangedRow>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Self::default()
        })
    }

    /// Replace or add a film work row
    pub fn upsert(&self, row: ChangedRow) {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|r| r.id != row.id);
        rows.push(row);
    }

    /// Fail the next `n` fetches with a transient error
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeSource for FakeSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<ChangedRow>> {
        self.queries.lock().unwrap().push(*query);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(transient_db_error());
        }

        let mut matching: Vec<ChangedRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| query.after.map_or(true, |after| Cursor::of(row) > after))
            .cloned()
            .collect();
        matching.sort_by_key(Cursor::of);

        Ok(matching.into_iter().take(query.limit as usize).collect())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    docs: Mutex<BTreeMap<Uuid, IndexDocument>>,
    calls: AtomicUsize,
    writes: AtomicUsize,
    ensure_calls: AtomicUsize,
    failures: AtomicUsize,
    reject_next: AtomicBool,
    observed_saves: Mutex<Vec<usize>>,
    observer: Option<InMemoryStateStore>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink that notes the state store's save count on every failed call
    pub fn observing(store: InMemoryStateStore) -> Arc<Self> {
        Arc::new(Self {
            observer: Some(store),
            ..Self::default()
        })
    }

    /// Fail the next `n` bulk calls with HTTP 503
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Answer the next bulk call with an item-level rejection
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn documents(&self) -> BTreeMap<Uuid, IndexDocument> {
        self.docs.lock().unwrap().clone()
    }

    pub fn document(&self, id: Uuid) -> Option<IndexDocument> {
        self.docs.lock().unwrap().get(&id).cloned()
    }

    /// Bulk calls received, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bulk calls that changed the index
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    /// Save counts seen while bulk calls were failing
    pub fn observed_saves(&self) -> Vec<usize> {
        self.observed_saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSink for RecordingSink {
    async fn ensure_index(&self) -> Result<IndexStatus> {
        if self.ensure_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(IndexStatus::Created)
        } else {
            Ok(IndexStatus::AlreadyExists)
        }
    }

    async fn bulk_upsert(&self, docs: &[IndexDocument]) -> Result<BulkOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if docs.is_empty() {
            return Ok(BulkOutcome::NothingToDo);
        }

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            if let Some(store) = &self.observer {
                self.observed_saves.lock().unwrap().push(store.save_count());
            }
            return Err(unavailable_index());
        }

        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Ok(BulkOutcome::Rejected {
                failed: 1,
                reason: "mapper_parsing_exception: failed to parse field [imdb_rating]".into(),
            });
        }

        let mut index = self.docs.lock().unwrap();
        for doc in docs {
            index.insert(doc.id, doc.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(BulkOutcome::Written { indexed: docs.len() })
    }
}

/// State store whose saves always fail permanently.
#[derive(Default)]
pub struct ReadOnlyStore;

#[async_trait]
impl StateStore for ReadOnlyStore {
    async fn save(&self, _state: &State) -> movies_state::Result<()> {
        Err(StorageError::config("state file is read-only"))
    }

    async fn load(&self) -> movies_state::Result<State> {
        Ok(State::new())
    }
}

pub fn options(batch_size: usize) -> SyncOptions {
    SyncOptions::new(batch_size, IDLE, BackoffPolicy::default())
}

pub fn sync_loop(
    source: &Arc<FakeSource>,
    sink: &Arc<RecordingSink>,
    store: &InMemoryStateStore,
    batch_size: usize,
) -> SyncLoop {
    SyncLoop::new(
        source.clone(),
        sink.clone(),
        Arc::new(store.clone()),
        options(batch_size),
    )
}
