//! Policy for live remote edits
//!
//! Decides, per sync mode, whether a `file-change` pushed by the plugin is
//! written to disk, dropped because a reconciliation in progress already
//! supersedes it, or rejected outright.

use super::machine::SyncMode;

/// Outcome of validating a remote change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    Apply,
    /// Dropped: an in-flight reconciliation covers it
    Queue { reason: &'static str },
    Reject,
}

/// Validate a remote change against the current mode
pub fn validate_incoming_change(mode: SyncMode) -> ChangeDecision {
    match mode {
        SyncMode::Watching => ChangeDecision::Apply,
        SyncMode::Handshaking | SyncMode::SnapshotProcessing => ChangeDecision::Queue {
            reason: "snapshot reconciliation in progress",
        },
        SyncMode::ConflictResolution => ChangeDecision::Queue {
            reason: "conflict resolution in progress",
        },
        SyncMode::Disconnected => ChangeDecision::Reject,
    }
}
