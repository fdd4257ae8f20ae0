//! Conflict detection
//!
//! Compares the remote snapshot, the local files directory and the persisted
//! sync state, and sorts every file into exactly one bucket:
//!
//! | local | persisted | remote | outcome |
//! |---|---|---|---|
//! | absent | absent | present | write (new from remote) |
//! | absent | present | present | conflict, local deleted offline |
//! | equal content | any | present | unchanged |
//! | different content | any | present | conflict |
//! | present | present | absent | conflict, remote deleted |
//! | present | absent | absent | local only (upload) |
//! | absent | present | absent | dropped, deleted on both sides |

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::hash::content_hash;
use crate::models::{FileRecord, Timestamp};
use crate::storage::PersistedFileState;

/// A file that changed on both sides, or changed on one and was deleted on the other
///
/// `None` content means the file is deleted on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub file_name: String,
    pub local_content: Option<String>,
    pub remote_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_modified_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_modified_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
    /// Local content still matches the hash recorded at the last sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_clean: Option<bool>,
}

/// Result of comparing both sides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictAnalysis {
    /// Remote files safe to write without asking
    pub writes: Vec<FileRecord>,
    pub conflicts: Vec<Conflict>,
    /// Never-synced local files to upload
    pub local_only: Vec<FileRecord>,
    /// Identical on both sides (remote record kept for its timestamp)
    pub unchanged: Vec<FileRecord>,
    /// Persisted names gone from both sides
    pub deleted_on_both_sides: Vec<String>,
}

/// Classify every file known to either side or to the persisted state
///
/// `persisted` is keyed by lookup key.
pub fn detect_conflicts(
    remote_files: &[FileRecord],
    local_files: &[FileRecord],
    persisted: &HashMap<String, PersistedFileState>,
) -> ConflictAnalysis {
    let mut analysis = ConflictAnalysis::default();

    let mut local_by_key: HashMap<String, &FileRecord> = HashMap::new();
    for local in local_files {
        local_by_key.entry(local.key()).or_insert(local);
    }

    let mut seen: HashSet<String> = HashSet::new();

    for remote in remote_files {
        let key = remote.key();
        if !seen.insert(key.clone()) {
            warn!("Ignoring duplicate remote file {}", remote.name);
            continue;
        }

        let record = persisted.get(&key);
        match local_by_key.get(&key) {
            None => match record {
                None => analysis.writes.push(remote.clone()),
                Some(record) => analysis.conflicts.push(Conflict {
                    file_name: remote.name.clone(),
                    local_content: None,
                    remote_content: Some(remote.content.clone()),
                    local_modified_at: None,
                    remote_modified_at: remote.modified_at,
                    last_synced_at: record.timestamp,
                    local_clean: None,
                }),
            },
            Some(local) if local.content == remote.content => {
                analysis.unchanged.push(remote.clone());
            }
            Some(local) => analysis.conflicts.push(Conflict {
                file_name: remote.name.clone(),
                local_content: Some(local.content.clone()),
                remote_content: Some(remote.content.clone()),
                local_modified_at: local.modified_at,
                remote_modified_at: remote.modified_at,
                last_synced_at: record.and_then(|r| r.timestamp),
                local_clean: record.map(|r| is_clean(local, r)),
            }),
        }
    }

    for local in local_files {
        let key = local.key();
        if !seen.insert(key.clone()) {
            continue;
        }

        match persisted.get(&key) {
            Some(record) => analysis.conflicts.push(Conflict {
                file_name: local.name.clone(),
                local_content: Some(local.content.clone()),
                remote_content: None,
                local_modified_at: local.modified_at,
                remote_modified_at: None,
                last_synced_at: record.timestamp,
                local_clean: Some(is_clean(local, record)),
            }),
            None => analysis.local_only.push(local.clone()),
        }
    }

    let mut gone: Vec<String> = persisted
        .keys()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();
    gone.sort();
    analysis.deleted_on_both_sides = gone;

    debug!(
        "Conflict detection: {} writes, {} conflicts, {} local-only, {} unchanged, {} deleted on both sides",
        analysis.writes.len(),
        analysis.conflicts.len(),
        analysis.local_only.len(),
        analysis.unchanged.len(),
        analysis.deleted_on_both_sides.len()
    );

    analysis
}

fn is_clean(local: &FileRecord, record: &PersistedFileState) -> bool {
    content_hash(&local.content) == record.content_hash
}
