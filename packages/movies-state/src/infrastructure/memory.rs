//! In-memory state store (for tests)
//!
//! Clones share the same underlying state, so a test can hand one clone to
//! the code under test and inspect another.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::domain::{State, StateStore};
use crate::error::Result;

#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    state: State,
    saves: usize,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `state`; the seed does not count as a save
    pub fn with_state(state: State) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().state = state;
        store
    }

    /// Number of `save` calls received so far
    pub fn save_count(&self) -> usize {
        self.inner.lock().unwrap().saves
    }

    /// Synchronous view of the current state
    pub fn snapshot(&self) -> State {
        self.inner.lock().unwrap().state.clone()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &State) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state = state.clone();
        inner.saves += 1;
        Ok(())
    }

    async fn load(&self) -> Result<State> {
        Ok(self.inner.lock().unwrap().state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStateStore::new();
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryStateStore::new();
        let other = store.clone();

        let mut state = State::new();
        state.insert("last_update".into(), json!("2023-01-01T00:00:00"));
        store.save(&state).await.unwrap();

        assert_eq!(other.snapshot(), state);
        assert_eq!(other.save_count(), 1);
    }

    #[tokio::test]
    async fn test_with_state_seed_is_not_a_save() {
        let mut state = State::new();
        state.insert("k".into(), json!(1));
        let store = InMemoryStateStore::with_state(state.clone());

        assert_eq!(store.load().await.unwrap(), state);
        assert_eq!(store.save_count(), 0);
    }
}
