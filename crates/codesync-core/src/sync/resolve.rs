//! Automatic conflict resolution
//!
//! Picks a whole version (never merges text) when one side is provably
//! unchanged since the last sync, and leaves genuine dual edits for the user.

use std::collections::HashMap;

use super::conflict::Conflict;
use crate::models::Timestamp;
use crate::paths::lookup_key;

/// Default tolerance for clock and propagation skew
pub const REMOTE_DRIFT_MS: i64 = 2000;

/// What to do with one conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Apply the remote version (delete locally if remote is deleted)
    Remote,
    /// Push the local version (delete remotely if local is deleted)
    Local,
    /// Neither side changed anything that matters
    NoOp,
    /// Both sides edited; ask the user
    Manual,
}

/// Conflicts sorted by decision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoResolution {
    pub remote: Vec<Conflict>,
    pub local: Vec<Conflict>,
    pub unchanged: Vec<Conflict>,
    pub unresolved: Vec<Conflict>,
}

/// Decide a single conflict given the remote's latest version time
pub fn decide(conflict: &Conflict, latest_remote_ms: Option<Timestamp>, drift_ms: i64) -> Decision {
    let local_clean = conflict.local_clean.unwrap_or(false);

    if conflict.remote_content.is_none() {
        return if local_clean {
            Decision::Remote
        } else {
            Decision::Manual
        };
    }

    let (Some(latest), Some(last_synced)) = (latest_remote_ms, conflict.last_synced_at) else {
        return Decision::Manual;
    };

    let remote_unchanged = latest <= last_synced + drift_ms;
    match (remote_unchanged, local_clean) {
        (true, false) => Decision::Local,
        (false, true) => Decision::Remote,
        (true, true) => Decision::NoOp,
        (false, false) => Decision::Manual,
    }
}

/// Run the heuristic over a batch
///
/// `versions` maps lookup keys to the remote's latest modification time.
pub fn auto_resolve(
    conflicts: &[Conflict],
    versions: &HashMap<String, Timestamp>,
    drift_ms: i64,
) -> AutoResolution {
    let mut resolution = AutoResolution::default();

    for conflict in conflicts {
        let latest = versions.get(&lookup_key(&conflict.file_name)).copied();
        let bucket = match decide(conflict, latest, drift_ms) {
            Decision::Remote => &mut resolution.remote,
            Decision::Local => &mut resolution.local,
            Decision::NoOp => &mut resolution.unchanged,
            Decision::Manual => &mut resolution.unresolved,
        };
        bucket.push(conflict.clone());
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(local_clean: Option<bool>, last_synced_at: Option<i64>) -> Conflict {
        Conflict {
            file_name: "App.tsx".to_string(),
            local_content: Some("local".to_string()),
            remote_content: Some("remote".to_string()),
            local_modified_at: None,
            remote_modified_at: None,
            last_synced_at,
            local_clean,
        }
    }

    #[test]
    fn test_remote_unchanged_local_dirty_resolves_local() {
        // 1500 <= 1000 + 2000
        let c = conflict(Some(false), Some(1000));
        assert_eq!(decide(&c, Some(1500), REMOTE_DRIFT_MS), Decision::Local);
    }

    #[test]
    fn test_remote_changed_local_clean_resolves_remote() {
        let c = conflict(Some(true), Some(1000));
        assert_eq!(decide(&c, Some(5000), REMOTE_DRIFT_MS), Decision::Remote);
    }

    #[test]
    fn test_both_unchanged_is_noop() {
        let c = conflict(Some(true), Some(1000));
        assert_eq!(decide(&c, Some(3000), REMOTE_DRIFT_MS), Decision::NoOp);
    }

    #[test]
    fn test_both_changed_needs_user() {
        let c = conflict(Some(false), Some(1000));
        assert_eq!(decide(&c, Some(3001), REMOTE_DRIFT_MS), Decision::Manual);
    }

    #[test]
    fn test_missing_timestamps_need_user() {
        assert_eq!(
            decide(&conflict(Some(true), None), Some(1), REMOTE_DRIFT_MS),
            Decision::Manual
        );
        assert_eq!(
            decide(&conflict(Some(true), Some(1)), None, REMOTE_DRIFT_MS),
            Decision::Manual
        );
    }

    #[test]
    fn test_remote_deleted() {
        let mut clean = conflict(Some(true), Some(1000));
        clean.remote_content = None;
        assert_eq!(decide(&clean, None, REMOTE_DRIFT_MS), Decision::Remote);

        let mut dirty = conflict(Some(false), Some(1000));
        dirty.remote_content = None;
        assert_eq!(decide(&dirty, Some(0), REMOTE_DRIFT_MS), Decision::Manual);
    }

    #[test]
    fn test_local_deleted_with_unchanged_remote_resolves_local() {
        let mut c = conflict(None, Some(1000));
        c.local_content = None;
        assert_eq!(decide(&c, Some(1000), REMOTE_DRIFT_MS), Decision::Local);
    }

    #[test]
    fn test_auto_resolve_buckets_by_lookup_key() {
        let mut a = conflict(Some(false), Some(1000));
        a.file_name = "Pages/Home.tsx".to_string();
        let mut b = conflict(Some(false), Some(1000));
        b.file_name = "Other.tsx".to_string();

        let mut versions = HashMap::new();
        versions.insert("pages/home.tsx".to_string(), 1200);
        versions.insert("other.tsx".to_string(), 9000);

        let result = auto_resolve(&[a, b], &versions, REMOTE_DRIFT_MS);
        assert_eq!(result.local.len(), 1);
        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].file_name, "Other.tsx");
        assert!(result.remote.is_empty() && result.unchanged.is_empty());
    }
}
