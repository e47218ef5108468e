//! movies-state - durable sync progress
//!
//! Holds the state mapping the ETL daemon uses to resume after a restart
//! (currently just the `last_update` watermark).
//!
//! ## Core Principles
//!
//! 1. **Full replacement**: `save` overwrites the whole mapping, it never merges
//! 2. **Absent is empty**: a store that was never written loads as `{}`
//! 3. **No torn writes**: the file adapter writes a temp file and renames it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use movies_state::{JsonFileStateStore, StateManager, StateStore};
//!
//! let store = JsonFileStateStore::new("storage.json")?;
//! let state = store.load().await?;          // {} on first run
//!
//! let manager = StateManager::new(store);
//! manager.set_value("last_update", "2023-01-01T00:00:00").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{State, StateManager, StateStore};

#[cfg(feature = "json-file")]
pub use infrastructure::JsonFileStateStore;
pub use infrastructure::InMemoryStateStore;
