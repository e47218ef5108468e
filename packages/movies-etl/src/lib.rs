/*
 * Movies ETL - incremental PostgreSQL → Elasticsearch sync
 *
 * Keeps a full-text search index of film works in step with the relational
 * catalog that editors change.
 *
 * Architecture:
 * - Change extraction (PostgreSQL, keyset pages by modification time and id)
 * - Denormalization (one document per film work)
 * - Bulk upsert (Elasticsearch, idempotent by film work id)
 * - Checkpoint/Resume (last confirmed position in a JSON state file)
 * - Retry with exponential backoff around every external call
 */

// Public modules
pub mod backoff;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extractor;
pub mod index_writer;
pub mod models;
pub mod sync_loop;
pub mod transform;

// Re-exports
pub use backoff::{retry, BackoffPolicy};
pub use checkpoint::{parse_watermark, Checkpoint, CheckpointManager, LAST_ID_KEY, LAST_UPDATE_KEY};
pub use config::{ConfigError, ElasticSettings, EtlSettings, LogFormat, PostgresSettings, Settings};
pub use error::{ErrorCategory, EtlError, Result, TransformError};
pub use extractor::{ChangeSource, Cursor, PageQuery, PostgresExtractor};
pub use index_writer::{BulkOutcome, DocumentSink, ElasticIndexWriter, IndexStatus};
pub use models::{ChangedRow, IndexDocument, PersonRecord, PersonRef, PersonRole};
pub use sync_loop::{CycleReport, SyncLoop, SyncMode, SyncOptions, SyncState};
pub use transform::transform;
