//! Sync checkpoint
//!
//! Stored as `{"last_update": "<RFC 3339>", "last_id": "<uuid>"}`: the
//! `(modified, id)` of the last row the index confirmed. `last_id` is
//! optional; without it the checkpoint resumes strictly after `last_update`.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use movies_state::{State, StateStore};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::extractor::Cursor;

pub const LAST_UPDATE_KEY: &str = "last_update";
pub const LAST_ID_KEY: &str = "last_id";

/// Position of the last confirmed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub last_update: DateTime<Utc>,
    pub last_id: Option<Uuid>,
}

impl Checkpoint {
    pub fn new(last_update: DateTime<Utc>) -> Self {
        Self {
            last_update,
            last_id: None,
        }
    }

    pub fn at(cursor: Cursor) -> Self {
        Self {
            last_update: cursor.modified,
            last_id: Some(cursor.id),
        }
    }

    /// Where the next incremental pass resumes.
    pub fn cursor(&self) -> Cursor {
        match self.last_id {
            Some(id) => Cursor::new(self.last_update, id),
            None => Cursor::after_watermark(self.last_update),
        }
    }

    /// `None` when the state has no `last_update` yet (first run).
    pub fn from_state(state: &State) -> Result<Option<Self>> {
        let last_update = match state.get(LAST_UPDATE_KEY) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(raw)) => parse_watermark(raw)?,
            Some(other) => {
                return Err(EtlError::Checkpoint(format!(
                    "{} must be a string, found {}",
                    LAST_UPDATE_KEY, other
                )))
            }
        };

        let last_id = match state.get(LAST_ID_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(Uuid::parse_str(raw).map_err(|e| {
                EtlError::Checkpoint(format!("unparsable {} {:?}: {}", LAST_ID_KEY, raw, e))
            })?),
            Some(other) => {
                return Err(EtlError::Checkpoint(format!(
                    "{} must be a string, found {}",
                    LAST_ID_KEY, other
                )))
            }
        };

        Ok(Some(Self {
            last_update,
            last_id,
        }))
    }

    pub fn to_state(&self) -> State {
        let mut state = State::new();
        state.insert(
            LAST_UPDATE_KEY.to_string(),
            Value::String(self.last_update.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        );
        if let Some(id) = self.last_id {
            state.insert(LAST_ID_KEY.to_string(), Value::String(id.to_string()));
        }
        state
    }
}

/// Parse an ISO-8601 watermark.
///
/// Accepts RFC 3339 with an offset, or a naive timestamp which is taken as UTC.
pub fn parse_watermark(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| EtlError::Checkpoint(format!("unparsable {} {:?}: {}", LAST_UPDATE_KEY, raw, e)))
}

/// Checkpoint persistence over any `StateStore`.
///
/// Saving replaces the whole stored mapping.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn StateStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let state = self.store.load().await?;
        Checkpoint::from_state(&state)
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.store.save(&checkpoint.to_state()).await?;
        Ok(())
    }
}
