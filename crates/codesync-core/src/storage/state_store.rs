//! Persisted sync state
//!
//! Records, per file, the content hash and remote timestamp as of the last
//! confirmed sync. Stored as a versioned JSON document:
//!
//! ```text
//! { "version": 1, "files": { "components/Hero.tsx": { "timestamp": 1700000000000, "contentHash": "..." } } }
//! ```
//!
//! A missing, unreadable or wrong-version document loads as empty state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use super::filesystem::atomic_write;
use crate::models::Timestamp;

/// Current on-disk format version
pub const STATE_VERSION: u32 = 1;

/// Sync record for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFileState {
    /// Remote modification time at the last confirmed sync
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    /// SHA-256 of the content at the last confirmed sync
    pub content_hash: String,
}

/// The whole persisted document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSyncState {
    pub version: u32,
    /// Keyed by normalized path (extension ensured)
    #[serde(default)]
    pub files: BTreeMap<String, PersistedFileState>,
}

impl Default for PersistedSyncState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            files: BTreeMap::new(),
        }
    }
}

/// Loads and saves the persisted sync state document
#[derive(Debug, Clone)]
pub struct SyncStateStore {
    path: PathBuf,
}

impl SyncStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, distinguishing "absent" from "invalid"
    pub fn try_load(&self) -> StorageResult<Option<PersistedSyncState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path).map_err(|source| StorageError::ReadError {
            path: self.path.clone(),
            source,
        })?;

        let state: PersistedSyncState =
            serde_json::from_str(&json).map_err(|e| StorageError::InvalidFormat {
                path: self.path.clone(),
                details: e.to_string(),
            })?;

        if state.version != STATE_VERSION {
            return Err(StorageError::InvalidFormat {
                path: self.path.clone(),
                details: format!(
                    "unsupported version {} (expected {})",
                    state.version, STATE_VERSION
                ),
            });
        }

        Ok(Some(state))
    }

    /// Load the document, treating any failure as "no persisted state"
    pub fn load(&self) -> PersistedSyncState {
        match self.try_load() {
            Ok(Some(state)) => {
                debug!(
                    "Loaded sync state for {} files from {:?}",
                    state.files.len(),
                    self.path
                );
                state
            }
            Ok(None) => PersistedSyncState::default(),
            Err(e) => {
                warn!("Ignoring persisted sync state: {}", e);
                PersistedSyncState::default()
            }
        }
    }

    /// Save the document atomically
    pub fn save(&self, state: &PersistedSyncState) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.path, &json)
    }
}

/// Background writer that coalesces state saves
///
/// At most one write is in flight; a snapshot scheduled while a write is
/// running replaces any snapshot still waiting.
pub struct StateFlusher {
    tx: watch::Sender<Option<PersistedSyncState>>,
    handle: JoinHandle<()>,
}

impl StateFlusher {
    /// Spawn the writer task on the current runtime
    pub fn spawn(store: SyncStateStore) -> Self {
        let (tx, mut rx) = watch::channel(None::<PersistedSyncState>);

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                let Some(state) = snapshot else {
                    continue;
                };

                let store = store.clone();
                let result = tokio::task::spawn_blocking(move || store.save(&state)).await;
                match result {
                    Ok(Ok(())) => debug!("Sync state flushed"),
                    Ok(Err(e)) => warn!("Failed to persist sync state: {}", e),
                    Err(e) => warn!("Sync state writer panicked: {}", e),
                }
            }
        });

        Self { tx, handle }
    }

    /// Queue a snapshot for writing
    pub fn schedule(&self, state: PersistedSyncState) {
        let _ = self.tx.send(Some(state));
    }

    /// Write any pending snapshot and stop the writer
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}
