//! File-backed cursor store.
//!
//! The state document is JSON. Commits write a sibling temp file and rename
//! it over the target, so a crash mid-write leaves the previous state intact.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    cursor::{CursorStore, ScanState},
    error::{WatchError, WatchResult},
};

#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> WatchResult<Option<ScanState>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WatchError::Persistence(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };
        // A corrupted state file is fatal: resuming without the ledger would
        // re-notify everything inside the lookback window.
        let state = serde_json::from_str(&text).map_err(|e| {
            WatchError::Persistence(format!("parsing {}: {e}", self.path.display()))
        })?;
        Ok(Some(state))
    }

    async fn commit(&self, state: &ScanState) -> WatchResult<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| WatchError::Persistence(format!("serializing scan state: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WatchError::Persistence(format!("creating {}: {e}", parent.display()))
            })?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| WatchError::Persistence(format!("writing {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            WatchError::Persistence(format!("renaming into {}: {e}", self.path.display()))
        })?;

        debug!(
            last_processed_block = ?state.last_processed_block,
            tracked_blocks = state.ledger.tracked_blocks(),
            "scan state committed"
        );
        Ok(())
    }
}
