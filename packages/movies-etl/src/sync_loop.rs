//! Sync loop: DETECT_MODE → FULL_SYNC | INCREMENTAL_SYNC → IDLE_WAIT → DETECT_MODE
//!
//! Each I/O call goes through [`retry`]. The checkpoint is written only after
//! the index confirmed the batch it covers, so a crash between the write and
//! the save replays that batch on restart (at-least-once).
//!
//! Pages are read by a `(modified, id)` cursor. A full pass starts from the
//! beginning, an incremental pass from the stored checkpoint; after each
//! confirmed batch the cursor moves to the batch's last row. Entering
//! IDLE_WAIT drops the cursor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use movies_state::StateStore;
use tracing::{error, info};

use crate::backoff::{retry, BackoffPolicy};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::EtlSettings;
use crate::error::Result;
use crate::extractor::{ChangeSource, Cursor, PageQuery};
use crate::index_writer::{BulkOutcome, DocumentSink, IndexStatus};
use crate::models::{ChangedRow, IndexDocument};
use crate::transform::transform;

/// First delay for database calls.
const EXTRACT_BACKOFF_START: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    DetectMode,
    /// Paging through everything; `cursor` is the last row indexed so far
    FullSync { cursor: Option<Cursor> },
    /// Draining rows after `cursor`, which is also the stored checkpoint
    IncrementalSync { cursor: Cursor },
    IdleWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

/// What one DETECT_MODE → IDLE_WAIT pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub mode: Option<SyncMode>,
    pub pages: usize,
    pub documents: usize,
    /// Last checkpoint persisted during the pass
    pub checkpoint: Option<DateTime<Utc>>,
    /// The index refused part of a batch and the pass stopped early
    pub rejected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub idle_interval: Duration,
    pub backoff: BackoffPolicy,
    pub extract_backoff: BackoffPolicy,
}

impl SyncOptions {
    pub fn new(batch_size: usize, idle_interval: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            batch_size: batch_size.max(1),
            idle_interval,
            backoff,
            extract_backoff: backoff.with_start(EXTRACT_BACKOFF_START),
        }
    }

    pub fn from_settings(settings: &EtlSettings) -> Self {
        Self::new(settings.batch_size, settings.idle_interval, settings.backoff)
    }

    fn limit(&self) -> i64 {
        i64::try_from(self.batch_size).unwrap_or(i64::MAX)
    }
}

pub struct SyncLoop {
    source: Arc<dyn ChangeSource>,
    sink: Arc<dyn DocumentSink>,
    checkpoints: CheckpointManager,
    options: SyncOptions,
    state: SyncState,
    report: CycleReport,
}

impl SyncLoop {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        sink: Arc<dyn DocumentSink>,
        store: Arc<dyn StateStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            sink,
            checkpoints: CheckpointManager::new(store),
            options,
            state: SyncState::DetectMode,
            report: CycleReport::default(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Make sure the target index exists. Safe on every start.
    pub async fn bootstrap(&self) -> Result<IndexStatus> {
        let sink = &*self.sink;
        let status = retry(&self.options.backoff, "ensure index", move || sink.ensure_index()).await?;
        info!(status = ?status, "index ready");
        Ok(status)
    }

    /// Ensure the index, then cycle forever. Returns only on a permanent error.
    pub async fn run(&mut self) -> Result<()> {
        self.bootstrap().await?;
        loop {
            self.step().await?;
        }
    }

    /// Step until the loop reaches IDLE_WAIT and report what the pass did.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        loop {
            if *self.step().await? == SyncState::IdleWait {
                return Ok(self.report.clone());
            }
        }
    }

    /// Perform exactly one state transition.
    pub async fn step(&mut self) -> Result<&SyncState> {
        let next = match self.state.clone() {
            SyncState::DetectMode => self.detect_mode().await?,
            SyncState::FullSync { cursor } => self.full_sync_page(cursor).await?,
            SyncState::IncrementalSync { cursor } => self.incremental_page(cursor).await?,
            SyncState::IdleWait => {
                tokio::time::sleep(self.options.idle_interval).await;
                SyncState::DetectMode
            }
        };
        self.state = next;
        Ok(&self.state)
    }

    async fn detect_mode(&mut self) -> Result<SyncState> {
        self.report = CycleReport::default();

        let checkpoints = &self.checkpoints;
        let checkpoint = retry(&self.options.backoff, "load checkpoint", move || checkpoints.load()).await?;

        match checkpoint {
            None => {
                info!(mode = "full", "no checkpoint found, starting full sync");
                self.report.mode = Some(SyncMode::Full);
                Ok(SyncState::FullSync { cursor: None })
            }
            Some(checkpoint) => {
                info!(
                    mode = "incremental",
                    watermark = %checkpoint.last_update,
                    "checkpoint found, syncing changes"
                );
                self.report.mode = Some(SyncMode::Incremental);
                Ok(SyncState::IncrementalSync {
                    cursor: checkpoint.cursor(),
                })
            }
        }
    }

    async fn full_sync_page(&mut self, cursor: Option<Cursor>) -> Result<SyncState> {
        let query = match cursor {
            Some(cursor) => PageQuery::after(cursor, self.options.limit()),
            None => PageQuery::first(self.options.limit()),
        };
        let rows = self.fetch(query).await?;

        let last = match rows.last() {
            Some(row) => Cursor::of(row),
            None => {
                match cursor {
                    Some(newest) => {
                        self.save_checkpoint(newest).await?;
                        info!(mode = "full", watermark = %newest.modified, "full sync complete");
                    }
                    None => info!(mode = "full", "source has no film works yet"),
                }
                return Ok(self.enter_idle());
            }
        };

        let docs = transform(&rows)?;
        if !self.write(SyncMode::Full, &rows, &docs).await? {
            return Ok(self.enter_idle());
        }

        Ok(SyncState::FullSync { cursor: Some(last) })
    }

    async fn incremental_page(&mut self, cursor: Cursor) -> Result<SyncState> {
        let rows = self
            .fetch(PageQuery::after(cursor, self.options.limit()))
            .await?;

        let last = match rows.last() {
            Some(row) => Cursor::of(row),
            None => {
                info!(mode = "incremental", watermark = %cursor.modified, "index is up to date");
                return Ok(self.enter_idle());
            }
        };

        let docs = transform(&rows)?;
        if !self.write(SyncMode::Incremental, &rows, &docs).await? {
            return Ok(self.enter_idle());
        }

        self.save_checkpoint(last).await?;
        Ok(SyncState::IncrementalSync { cursor: last })
    }

    async fn fetch(&self, query: PageQuery) -> Result<Vec<ChangedRow>> {
        let source = &*self.source;
        let query = &query;
        retry(&self.options.extract_backoff, "fetch page", move || source.fetch_page(query)).await
    }

    /// Bulk-write `docs`; `false` when the index rejected part of the batch.
    async fn write(&mut self, mode: SyncMode, rows: &[ChangedRow], docs: &[IndexDocument]) -> Result<bool> {
        let sink = &*self.sink;
        let outcome = retry(&self.options.backoff, "bulk upsert", move || sink.bulk_upsert(docs)).await?;

        if let BulkOutcome::Rejected { failed, reason } = &outcome {
            error!(
                mode = mode.as_str(),
                failed,
                reason = %reason,
                "index rejected batch, checkpoint not advanced"
            );
        }
        if !outcome.is_confirmed() {
            self.report.rejected = true;
            return Ok(false);
        }

        info!(
            mode = mode.as_str(),
            rows = rows.len(),
            documents = docs.len(),
            "batch indexed"
        );
        self.report.pages += 1;
        self.report.documents += docs.len();
        Ok(true)
    }

    async fn save_checkpoint(&mut self, cursor: Cursor) -> Result<()> {
        let checkpoint = Checkpoint::at(cursor);
        let checkpoints = &self.checkpoints;
        let checkpoint_ref = &checkpoint;
        retry(&self.options.backoff, "save checkpoint", move || checkpoints.save(checkpoint_ref)).await?;
        self.report.checkpoint = Some(cursor.modified);
        Ok(())
    }

    fn enter_idle(&mut self) -> SyncState {
        info!(
            mode = self.report.mode.map(|m| m.as_str()),
            pages = self.report.pages,
            documents = self.report.documents,
            idle_secs = self.options.idle_interval.as_secs_f64(),
            "cycle finished, idling"
        );
        SyncState::IdleWait
    }
}
