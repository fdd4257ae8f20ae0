//! Echo suppression
//!
//! Remembers the hash of every file the daemon itself wrote or sent, and
//! every path it deleted on behalf of the remote, so the filesystem watcher
//! events those actions cause can be recognized and dropped.
//!
//! Entries live for the process lifetime only. Pending deletes expire after
//! a fixed TTL and are evicted lazily.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::hash::content_hash;
use crate::paths::lookup_key;

/// Default window during which a watcher delete is treated as an echo
pub const DEFAULT_DELETE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct HashTracker {
    /// lookup key -> hash of the content we last wrote or sent
    written: HashMap<String, String>,
    /// lookup key -> deadline after which a delete is no longer ours
    pending_deletes: HashMap<String, Instant>,
    delete_ttl: Duration,
}

impl Default for HashTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTracker {
    pub fn new() -> Self {
        Self::with_delete_ttl(DEFAULT_DELETE_TTL)
    }

    pub fn with_delete_ttl(delete_ttl: Duration) -> Self {
        Self {
            written: HashMap::new(),
            pending_deletes: HashMap::new(),
            delete_ttl,
        }
    }

    /// Record content we are about to write (or just sent) for a path
    pub fn remember(&mut self, name: &str, content: &str) {
        self.written.insert(lookup_key(name), content_hash(content));
    }

    /// Whether this content for this path is an echo of our own write
    pub fn should_skip(&self, name: &str, content: &str) -> bool {
        self.written
            .get(&lookup_key(name))
            .is_some_and(|hash| *hash == content_hash(content))
    }

    /// Drop the remembered hash for a path
    pub fn forget(&mut self, name: &str) {
        self.written.remove(&lookup_key(name));
    }

    /// Record a delete we are about to perform; re-marking resets the deadline
    pub fn mark_delete(&mut self, name: &str) {
        self.pending_deletes
            .insert(lookup_key(name), Instant::now() + self.delete_ttl);
    }

    /// Whether a watcher delete for this path is an echo of our own delete
    pub fn should_skip_delete(&mut self, name: &str) -> bool {
        let key = lookup_key(name);
        match self.pending_deletes.get(&key) {
            Some(deadline) if Instant::now() < *deadline => true,
            Some(_) => {
                self.pending_deletes.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Cancel a pending delete immediately
    pub fn clear_delete(&mut self, name: &str) {
        self.pending_deletes.remove(&lookup_key(name));
    }
}
