//! JSON file adapter for `StateStore`
//!
//! The state lives in one local file holding a JSON object. Writes go to a
//! sibling `.tmp` file which is synced and then renamed over the target, so a
//! reader sees either the old or the new object, never a torn write.

use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::{State, StateStore};
use crate::error::{Result, StorageError};

/// File-backed state store
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(StorageError::config("state file path is empty"));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn save(&self, state: &State) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        let tmp_path = self.tmp_path();

        {
            let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
                StorageError::io(format!("failed to create {}: {}", tmp_path.display(), e))
                    .with_source(e)
            })?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }

        fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            StorageError::io(format!(
                "failed to move {} to {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
            .with_source(e)
        })?;

        debug!(path = %self.path.display(), keys = state.len(), "state saved");
        Ok(())
    }

    async fn load(&self) -> Result<State> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file yet");
                return Ok(State::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<serde_json::Value>(&bytes)? {
            serde_json::Value::Object(state) => Ok(state),
            other => Err(StorageError::serialization(format!(
                "{} holds a JSON {} instead of an object",
                self.path.display(),
                json_type_name(&other)
            ))),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
