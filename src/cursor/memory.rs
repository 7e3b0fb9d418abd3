//! In-memory cursor store for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    cursor::{CursorStore, ScanState},
    error::WatchResult,
};

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    state: Mutex<Option<ScanState>>,
}

impl MemoryCursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing state, as if a prior run had
    /// committed it.
    #[must_use]
    pub fn with_state(state: ScanState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Current state snapshot, for assertions.
    #[must_use]
    pub fn snapshot(&self) -> Option<ScanState> {
        self.state.lock().expect("store lock poisoned").clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> WatchResult<Option<ScanState>> {
        Ok(self.state.lock().expect("store lock poisoned").clone())
    }

    async fn commit(&self, state: &ScanState) -> WatchResult<()> {
        *self.state.lock().expect("store lock poisoned") = Some(state.clone());
        Ok(())
    }
}
