//! Domain layer for the sync state store
//!
//! # Model
//!
//! The persisted state is a single JSON object. The sync loop keeps its
//! watermark under `last_update`; nothing here interprets the keys.
//!
//! # Port Trait
//!
//! - `StateStore`: `save` replaces the whole object, `load` returns it
//!   (or an empty object when nothing was ever saved)
//!
//! # Examples
//!
//! ```rust,ignore
//! use movies_state::{InMemoryStateStore, State, StateStore};
//!
//! async fn example(store: impl StateStore) -> Result<()> {
//!     let mut state = State::new();
//!     state.insert("last_update".into(), "2023-01-01T00:00:00".into());
//!     store.save(&state).await?;
//!
//!     assert_eq!(store.load().await?, state);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::Result;

/// Full persisted state mapping
pub type State = serde_json::Map<String, Value>;

// ═══════════════════════════════════════════════════════════════════════════
// Port
// ═══════════════════════════════════════════════════════════════════════════

/// Durable storage for the sync state
///
/// # Contract
///
/// - `save` is a full replacement, never a merge
/// - `load` on a store that was never written returns an empty map, not an error
/// - a crash during `save` leaves either the previous or the new state readable
///
/// # Implementations
///
/// - `JsonFileStateStore`: local JSON file (temp file + rename)
/// - `InMemoryStateStore`: process memory, for tests
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Replace the stored state with `state`
    async fn save(&self, state: &State) -> Result<()>;

    /// Read the stored state
    async fn load(&self) -> Result<State>;
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn save(&self, state: &State) -> Result<()> {
        (**self).save(state).await
    }

    async fn load(&self) -> Result<State> {
        (**self).load().await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Keyed access
// ═══════════════════════════════════════════════════════════════════════════

/// Per-key access on top of a `StateStore`.
///
/// `set_value` reloads the current state, changes one key and saves the
/// result, so other keys survive. Every call goes to the store; nothing is
/// cached.
pub struct StateManager<S> {
    store: S,
}

impl<S: StateStore> StateManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Set `key` to `value`, keeping the rest of the stored state
    pub async fn set_value(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let mut state = self.store.load().await?;
        state.insert(key.to_string(), value.into());
        self.store.save(&state).await
    }

    /// Current value of `key`, if any
    pub async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.store.load().await?.remove(key))
    }
}
