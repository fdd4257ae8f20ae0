//! In-memory index over the persisted sync state
//!
//! Tracks, per file, the hash of the latest local content we know about and
//! the hash as of the last confirmed sync. The two are equal right after a
//! successful sync and diverge only while an unsynced local edit is in
//! flight. Persistence is lazy: `persist` hands a snapshot to the coalescing
//! flusher when one is attached, or writes synchronously otherwise.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::Timestamp;
use crate::paths::{ensure_extension, lookup_key};
use crate::storage::{PersistedFileState, PersistedSyncState, StateFlusher, SyncStateStore};

/// Cache entry for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSyncMetadata {
    /// Normalized path with extension ensured
    pub name: String,
    /// Hash of the most recent local content we have observed or sent
    pub local_hash: String,
    /// Hash as of the last confirmed sync; `None` until the first one
    pub last_synced_hash: Option<String>,
    /// Remote modification time as of the last confirmed sync
    pub last_remote_timestamp: Option<Timestamp>,
}

pub struct FileMetadataCache {
    entries: HashMap<String, FileSyncMetadata>,
    store: SyncStateStore,
    flusher: Option<StateFlusher>,
    /// Disk state has been read; queued snapshots may still be unwritten
    loaded: bool,
}

impl FileMetadataCache {
    pub fn new(store: SyncStateStore) -> Self {
        Self {
            entries: HashMap::new(),
            store,
            flusher: None,
            loaded: false,
        }
    }

    /// Route `persist` through a background flusher
    pub fn with_flusher(mut self, flusher: StateFlusher) -> Self {
        self.flusher = Some(flusher);
        self
    }

    /// Replace the cache contents with the persisted state on disk
    pub fn load(&mut self) {
        let state = self.store.load();
        self.entries = state
            .files
            .into_iter()
            .map(|(name, file)| {
                let name = ensure_extension(&name);
                let entry = FileSyncMetadata {
                    name: name.clone(),
                    local_hash: file.content_hash.clone(),
                    last_synced_hash: Some(file.content_hash),
                    last_remote_timestamp: file.timestamp,
                };
                (lookup_key(&name), entry)
            })
            .collect();
        self.loaded = true;
        debug!("Metadata cache loaded {} entries", self.entries.len());
    }

    /// Load from disk unless this process already has
    ///
    /// Returns true when the disk state was read.
    pub fn ensure_loaded(&mut self) -> bool {
        if self.loaded {
            debug!("Metadata cache already loaded, keeping {} entries", self.entries.len());
            return false;
        }
        self.load();
        true
    }

    pub fn get(&self, name: &str) -> Option<&FileSyncMetadata> {
        self.entries.get(&lookup_key(name))
    }

    pub fn last_synced_hash(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|m| m.last_synced_hash.as_deref())
    }

    /// Record a completed sync: local and synced hashes become equal
    pub fn record_sync(&mut self, name: &str, hash: &str, remote_timestamp: Option<Timestamp>) {
        let entry = self.entry_mut(name, hash);
        entry.local_hash = hash.to_string();
        entry.last_synced_hash = Some(hash.to_string());
        if remote_timestamp.is_some() {
            entry.last_remote_timestamp = remote_timestamp;
        }
    }

    /// Record local content that has not been confirmed by the remote yet
    pub fn record_local_change(&mut self, name: &str, hash: &str) {
        self.entry_mut(name, hash).local_hash = hash.to_string();
    }

    /// Promote the latest local hash to synced after the remote acknowledged it
    ///
    /// Returns false when the file is unknown.
    pub fn mark_synced(&mut self, name: &str, remote_timestamp: Option<Timestamp>) -> bool {
        let Some(entry) = self.entries.get_mut(&lookup_key(name)) else {
            return false;
        };
        entry.last_synced_hash = Some(entry.local_hash.clone());
        if remote_timestamp.is_some() {
            entry.last_remote_timestamp = remote_timestamp;
        }
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<FileSyncMetadata> {
        self.entries.remove(&lookup_key(name))
    }

    /// Persisted view keyed by lookup key, for conflict detection
    pub fn persisted_files(&self) -> HashMap<String, PersistedFileState> {
        self.entries
            .iter()
            .filter_map(|(key, entry)| {
                let hash = entry.last_synced_hash.clone()?;
                Some((
                    key.clone(),
                    PersistedFileState {
                        timestamp: entry.last_remote_timestamp,
                        content_hash: hash,
                    },
                ))
            })
            .collect()
    }

    /// The document that would be written to disk
    pub fn snapshot(&self) -> PersistedSyncState {
        let mut state = PersistedSyncState::default();
        for entry in self.entries.values() {
            if let Some(ref hash) = entry.last_synced_hash {
                state.files.insert(
                    entry.name.clone(),
                    PersistedFileState {
                        timestamp: entry.last_remote_timestamp,
                        content_hash: hash.clone(),
                    },
                );
            }
        }
        state
    }

    /// Persist the current snapshot
    pub fn persist(&self) {
        let snapshot = self.snapshot();
        match self.flusher {
            Some(ref flusher) => flusher.schedule(snapshot),
            None => {
                if let Err(e) = self.store.save(&snapshot) {
                    warn!("Failed to persist sync state: {}", e);
                }
            }
        }
    }

    /// Wait for any queued write to land
    pub async fn shutdown(self) {
        if let Some(flusher) = self.flusher {
            flusher.shutdown().await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, name: &str, hash: &str) -> &mut FileSyncMetadata {
        let name = ensure_extension(name);
        self.entries
            .entry(lookup_key(&name))
            .or_insert_with(|| FileSyncMetadata {
                name,
                local_hash: hash.to_string(),
                last_synced_hash: None,
                last_remote_timestamp: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, FileMetadataCache) {
        let temp_dir = TempDir::new().unwrap();
        let store = SyncStateStore::new(temp_dir.path().join("state.json"));
        (temp_dir, FileMetadataCache::new(store))
    }

    #[test]
    fn test_record_sync_equalizes_hashes() {
        let (_dir, mut cache) = cache();
        cache.record_sync("App.tsx", "h1", Some(100));

        let entry = cache.get("app.tsx").unwrap();
        assert_eq!(entry.local_hash, "h1");
        assert_eq!(entry.last_synced_hash.as_deref(), Some("h1"));
        assert_eq!(entry.last_remote_timestamp, Some(100));
    }

    #[test]
    fn test_local_change_diverges_until_marked_synced() {
        let (_dir, mut cache) = cache();
        cache.record_sync("App.tsx", "h1", Some(100));
        cache.record_local_change("App.tsx", "h2");

        assert_eq!(cache.last_synced_hash("App.tsx"), Some("h1"));
        assert_eq!(cache.get("App.tsx").unwrap().local_hash, "h2");

        assert!(cache.mark_synced("App.tsx", Some(200)));
        assert_eq!(cache.last_synced_hash("App.tsx"), Some("h2"));
        assert_eq!(cache.get("App.tsx").unwrap().last_remote_timestamp, Some(200));

        assert!(!cache.mark_synced("Unknown.tsx", None));
    }

    #[test]
    fn test_unsynced_entries_are_not_persisted() {
        let (_dir, mut cache) = cache();
        cache.record_local_change("Draft.tsx", "h");
        cache.record_sync("Done.tsx", "d", None);

        let snapshot = cache.snapshot();
        assert!(snapshot.files.contains_key("Done.tsx"));
        assert!(!snapshot.files.contains_key("Draft.tsx"));
        assert_eq!(cache.persisted_files().len(), 1);
    }

    #[test]
    fn test_persist_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let store = SyncStateStore::new(temp_dir.path().join("state.json"));

        let mut cache = FileMetadataCache::new(store.clone());
        cache.record_sync("Components/Hero.tsx", "abc", Some(42));
        cache.persist();

        let mut reloaded = FileMetadataCache::new(store);
        reloaded.load();
        assert_eq!(reloaded.len(), 1);
        let entry = reloaded.get("components/hero.tsx").unwrap();
        assert_eq!(entry.name, "Components/Hero.tsx");
        assert_eq!(entry.last_synced_hash.as_deref(), Some("abc"));
        assert_eq!(
            reloaded.persisted_files()["components/hero.tsx"].timestamp,
            Some(42)
        );
    }

    #[test]
    fn test_ensure_loaded_keeps_newer_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = SyncStateStore::new(temp_dir.path().join("state.json"));

        let mut cache = FileMetadataCache::new(store);
        assert!(cache.ensure_loaded());
        cache.record_sync("App.tsx", "h1", Some(10));

        // Nothing was persisted, so a reload would drop the entry
        assert!(!cache.ensure_loaded());
        assert_eq!(cache.last_synced_hash("App.tsx"), Some("h1"));
    }

    #[test]
    fn test_remove() {
        let (_dir, mut cache) = cache();
        cache.record_sync("App.tsx", "h", None);
        assert!(cache.remove("APP.tsx").is_some());
        assert!(cache.is_empty());
    }
}
