//! Sync lifecycle state machine
//!
//! `transition` maps (state, event) to (next state, ordered effects). It
//! performs no I/O and never mutates its input; the executor interprets the
//! effects, and some of them feed new events back in.
//!
//! ```text
//! disconnected -> handshaking -> snapshot_processing -> watching
//!                                        |                  ^
//!                                        v                  |
//!                               conflict_resolution --------+
//! ```
//!
//! Any mode returns to `disconnected` on DISCONNECT. An event that is not
//! valid for the current mode leaves the state untouched and yields a single
//! log effect.

use std::collections::HashMap;
use std::fmt;

use super::conflict::{Conflict, ConflictAnalysis};
use super::message::{ConflictVersion, OutboundMessage, Resolution};
use super::resolve::{auto_resolve, REMOTE_DRIFT_MS};
use super::validator::{validate_incoming_change, ChangeDecision};
use super::watcher::{WatcherEvent, WatcherEventKind};
use crate::models::{FileRecord, Timestamp};
use crate::paths::lookup_key;

/// Lifecycle mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    Disconnected,
    Handshaking,
    SnapshotProcessing,
    ConflictResolution,
    Watching,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::Disconnected => "disconnected",
            SyncMode::Handshaking => "handshaking",
            SyncMode::SnapshotProcessing => "snapshot_processing",
            SyncMode::ConflictResolution => "conflict_resolution",
            SyncMode::Watching => "watching",
        };
        f.write_str(name)
    }
}

/// Mode plus the data only that mode carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Handshaking,
    SnapshotProcessing,
    ConflictResolution { pending_conflicts: Vec<Conflict> },
    Watching,
}

/// The daemon's single sync state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub phase: Phase,
    /// Remote snapshot being reconciled
    pub pending_remote_changes: Vec<FileRecord>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl SyncState {
    pub fn disconnected() -> Self {
        Self {
            phase: Phase::Disconnected,
            pending_remote_changes: Vec::new(),
        }
    }

    fn with_phase(phase: Phase, pending_remote_changes: Vec<FileRecord>) -> Self {
        Self {
            phase,
            pending_remote_changes,
        }
    }

    pub fn mode(&self) -> SyncMode {
        match self.phase {
            Phase::Disconnected => SyncMode::Disconnected,
            Phase::Handshaking => SyncMode::Handshaking,
            Phase::SnapshotProcessing => SyncMode::SnapshotProcessing,
            Phase::ConflictResolution { .. } => SyncMode::ConflictResolution,
            Phase::Watching => SyncMode::Watching,
        }
    }

    pub fn pending_conflicts(&self) -> &[Conflict] {
        match self.phase {
            Phase::ConflictResolution {
                ref pending_conflicts,
            } => pending_conflicts,
            _ => &[],
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Handshake { project_name: Option<String> },
    RequestFiles,
    RemoteFileList { files: Vec<FileRecord> },
    ConflictsDetected { analysis: ConflictAnalysis },
    RemoteFileChange { file: FileRecord },
    RemoteFileDelete { file_names: Vec<String> },
    ConflictsResolved { resolution: Resolution },
    ConflictVersionResponse { versions: Vec<ConflictVersion> },
    FileSynced {
        file_name: String,
        remote_modified_at: Option<Timestamp>,
    },
    LocalDeleteApproved { file_names: Vec<String> },
    LocalDeleteRejected { files: Vec<FileRecord> },
    Watcher(WatcherEvent),
    Disconnect,
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Handshake { .. } => "HANDSHAKE",
            SyncEvent::RequestFiles => "REQUEST_FILES",
            SyncEvent::RemoteFileList { .. } => "REMOTE_FILE_LIST",
            SyncEvent::ConflictsDetected { .. } => "CONFLICTS_DETECTED",
            SyncEvent::RemoteFileChange { .. } => "REMOTE_FILE_CHANGE",
            SyncEvent::RemoteFileDelete { .. } => "REMOTE_FILE_DELETE",
            SyncEvent::ConflictsResolved { .. } => "CONFLICTS_RESOLVED",
            SyncEvent::ConflictVersionResponse { .. } => "CONFLICT_VERSION_RESPONSE",
            SyncEvent::FileSynced { .. } => "FILE_SYNCED",
            SyncEvent::LocalDeleteApproved { .. } => "LOCAL_DELETE_APPROVED",
            SyncEvent::LocalDeleteRejected { .. } => "LOCAL_DELETE_REJECTED",
            SyncEvent::Watcher(_) => "WATCHER_EVENT",
            SyncEvent::Disconnect => "DISCONNECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// Side effects requested by a transition, executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    InitWorkspace {
        project_name: Option<String>,
    },
    LoadPersistedState,
    SendMessage(OutboundMessage),
    /// Compare snapshot, disk and persisted state; yields CONFLICTS_DETECTED
    DetectConflicts {
        remote_files: Vec<FileRecord>,
    },
    WriteFiles {
        files: Vec<FileRecord>,
        silent: bool,
        skip_echo: bool,
    },
    DeleteLocalFiles {
        file_names: Vec<String>,
    },
    /// Push local content; `force` bypasses the already-synced short-circuit
    SendLocalChange {
        file_name: String,
        content: String,
        force: bool,
    },
    LocalInitiatedFileDelete {
        file_names: Vec<String>,
        require_confirmation: bool,
    },
    RequestConflictVersions {
        conflicts: Vec<Conflict>,
    },
    RequestConflictDecisions {
        conflicts: Vec<Conflict>,
    },
    RecordUnchanged {
        files: Vec<FileRecord>,
    },
    RecordRemoteTimestamp {
        file_name: String,
        remote_modified_at: Option<Timestamp>,
    },
    ForgetDeletedFiles {
        file_names: Vec<String>,
    },
    SendFileList,
    PersistState,
    SyncComplete {
        total_count: usize,
        updated_count: usize,
        unchanged_count: usize,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::InitWorkspace { .. } => "INIT_WORKSPACE",
            Effect::LoadPersistedState => "LOAD_PERSISTED_STATE",
            Effect::SendMessage(_) => "SEND_MESSAGE",
            Effect::DetectConflicts { .. } => "DETECT_CONFLICTS",
            Effect::WriteFiles { .. } => "WRITE_FILES",
            Effect::DeleteLocalFiles { .. } => "DELETE_LOCAL_FILES",
            Effect::SendLocalChange { .. } => "SEND_LOCAL_CHANGE",
            Effect::LocalInitiatedFileDelete { .. } => "LOCAL_INITIATED_FILE_DELETE",
            Effect::RequestConflictVersions { .. } => "REQUEST_CONFLICT_VERSIONS",
            Effect::RequestConflictDecisions { .. } => "REQUEST_CONFLICT_DECISIONS",
            Effect::RecordUnchanged { .. } => "RECORD_UNCHANGED",
            Effect::RecordRemoteTimestamp { .. } => "RECORD_REMOTE_TIMESTAMP",
            Effect::ForgetDeletedFiles { .. } => "FORGET_DELETED_FILES",
            Effect::SendFileList => "SEND_FILE_LIST",
            Effect::PersistState => "PERSIST_STATE",
            Effect::SyncComplete { .. } => "SYNC_COMPLETE",
            Effect::Log { .. } => "LOG",
        }
    }

    fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Effect::Log {
            level,
            message: message.into(),
        }
    }
}

/// Tunables that shape transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMachine {
    pub remote_drift_ms: i64,
    pub confirm_deletes: bool,
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self {
            remote_drift_ms: REMOTE_DRIFT_MS,
            confirm_deletes: true,
        }
    }
}

/// Transition with default tunables
pub fn transition(state: &SyncState, event: SyncEvent) -> (SyncState, Vec<Effect>) {
    SyncMachine::default().transition(state, event)
}

impl SyncMachine {
    pub fn transition(&self, state: &SyncState, event: SyncEvent) -> (SyncState, Vec<Effect>) {
        let mode = state.mode();

        match (mode, event) {
            (SyncMode::Disconnected, SyncEvent::Handshake { project_name }) => (
                SyncState::with_phase(Phase::Handshaking, Vec::new()),
                vec![
                    Effect::InitWorkspace { project_name },
                    Effect::LoadPersistedState,
                    Effect::SendMessage(OutboundMessage::RequestFiles),
                ],
            ),

            (SyncMode::Handshaking, SyncEvent::RemoteFileList { files }) => (
                SyncState::with_phase(Phase::SnapshotProcessing, files.clone()),
                vec![Effect::DetectConflicts {
                    remote_files: files,
                }],
            ),

            (SyncMode::SnapshotProcessing, SyncEvent::ConflictsDetected { analysis }) => {
                conflicts_detected(state, analysis)
            }

            (_, SyncEvent::RemoteFileChange { file }) => match validate_incoming_change(mode) {
                ChangeDecision::Apply => (
                    state.clone(),
                    vec![Effect::WriteFiles {
                        files: vec![file],
                        silent: false,
                        skip_echo: true,
                    }],
                ),
                ChangeDecision::Queue { reason } => (
                    state.clone(),
                    vec![Effect::log(
                        LogLevel::Debug,
                        format!("Deferring remote change to {}: {}", file.name, reason),
                    )],
                ),
                ChangeDecision::Reject => (
                    state.clone(),
                    vec![Effect::log(
                        LogLevel::Warn,
                        format!("Rejecting remote change to {} while {}", file.name, mode),
                    )],
                ),
            },

            (m, SyncEvent::RemoteFileDelete { file_names }) if m != SyncMode::Disconnected => {
                (state.clone(), vec![Effect::DeleteLocalFiles { file_names }])
            }

            (SyncMode::ConflictResolution, SyncEvent::ConflictsResolved { resolution }) => {
                conflicts_resolved(state.pending_conflicts(), resolution)
            }

            (SyncMode::ConflictResolution, SyncEvent::ConflictVersionResponse { versions }) => {
                self.conflict_versions(state, versions)
            }

            (SyncMode::Watching, SyncEvent::Watcher(event)) => {
                (state.clone(), self.watcher_effects(event))
            }

            (SyncMode::Watching, SyncEvent::RequestFiles) => {
                (state.clone(), vec![Effect::SendFileList])
            }

            (
                m,
                SyncEvent::FileSynced {
                    file_name,
                    remote_modified_at,
                },
            ) if m != SyncMode::Disconnected => (
                state.clone(),
                vec![Effect::RecordRemoteTimestamp {
                    file_name,
                    remote_modified_at,
                }],
            ),

            (m, SyncEvent::LocalDeleteApproved { file_names }) if m != SyncMode::Disconnected => {
                (state.clone(), vec![Effect::ForgetDeletedFiles { file_names }])
            }

            // Restored content matches what we last wrote, so no echo filter
            (m, SyncEvent::LocalDeleteRejected { files }) if m != SyncMode::Disconnected => (
                state.clone(),
                vec![Effect::WriteFiles {
                    files,
                    silent: false,
                    skip_echo: false,
                }],
            ),

            (_, SyncEvent::Disconnect) => (SyncState::disconnected(), vec![Effect::PersistState]),

            (m, SyncEvent::Watcher(event)) => (
                state.clone(),
                vec![Effect::log(
                    LogLevel::Debug,
                    format!("Ignoring watcher event for {} while {}", event.relative_path, m),
                )],
            ),

            (m, event) => (
                state.clone(),
                vec![Effect::log(
                    LogLevel::Warn,
                    format!("Ignoring {} while {}", event.name(), m),
                )],
            ),
        }
    }

    fn watcher_effects(&self, event: WatcherEvent) -> Vec<Effect> {
        match event.kind {
            WatcherEventKind::Add | WatcherEventKind::Change => match event.content {
                Some(content) => vec![Effect::SendLocalChange {
                    file_name: event.relative_path,
                    content,
                    force: false,
                }],
                None => vec![Effect::log(
                    LogLevel::Warn,
                    format!("Watcher event for {} carried no content", event.relative_path),
                )],
            },
            WatcherEventKind::Delete => vec![Effect::LocalInitiatedFileDelete {
                file_names: vec![event.relative_path],
                require_confirmation: self.confirm_deletes,
            }],
        }
    }

    fn conflict_versions(
        &self,
        state: &SyncState,
        versions: Vec<ConflictVersion>,
    ) -> (SyncState, Vec<Effect>) {
        let latest: HashMap<String, Timestamp> = versions
            .into_iter()
            .filter_map(|v| Some((lookup_key(&v.file_name), v.latest_remote_version_ms?)))
            .collect();

        let pending = state.pending_conflicts();
        let resolution = auto_resolve(pending, &latest, self.remote_drift_ms);

        let mut effects = Vec::new();
        effects.extend(apply_remote(&resolution.remote));
        effects.extend(apply_local(&resolution.local));

        if !resolution.unresolved.is_empty() {
            effects.push(Effect::RequestConflictDecisions {
                conflicts: resolution.unresolved.clone(),
            });
            let next = SyncState::with_phase(
                Phase::ConflictResolution {
                    pending_conflicts: resolution.unresolved,
                },
                state.pending_remote_changes.clone(),
            );
            return (next, effects);
        }

        effects.push(Effect::PersistState);
        effects.push(Effect::SyncComplete {
            total_count: pending.len(),
            updated_count: resolution.remote.len() + resolution.local.len(),
            unchanged_count: resolution.unchanged.len(),
        });
        (SyncState::with_phase(Phase::Watching, Vec::new()), effects)
    }
}

fn conflicts_detected(state: &SyncState, analysis: ConflictAnalysis) -> (SyncState, Vec<Effect>) {
    let remote_count = state.pending_remote_changes.len();
    let safe_writes = analysis.writes.len();
    let local_only = analysis.local_only.len();

    let mut effects = Vec::new();
    if !analysis.writes.is_empty() {
        effects.push(Effect::WriteFiles {
            files: analysis.writes,
            silent: false,
            skip_echo: false,
        });
    }
    if !analysis.unchanged.is_empty() {
        effects.push(Effect::RecordUnchanged {
            files: analysis.unchanged,
        });
    }
    if !analysis.deleted_on_both_sides.is_empty() {
        effects.push(Effect::ForgetDeletedFiles {
            file_names: analysis.deleted_on_both_sides,
        });
    }
    for file in analysis.local_only {
        effects.push(Effect::SendLocalChange {
            file_name: file.name,
            content: file.content,
            force: false,
        });
    }

    if !analysis.conflicts.is_empty() {
        effects.push(Effect::RequestConflictVersions {
            conflicts: analysis.conflicts.clone(),
        });
        let next = SyncState::with_phase(
            Phase::ConflictResolution {
                pending_conflicts: analysis.conflicts,
            },
            state.pending_remote_changes.clone(),
        );
        return (next, effects);
    }

    effects.push(Effect::PersistState);
    effects.push(Effect::SyncComplete {
        total_count: remote_count + local_only,
        updated_count: safe_writes + local_only,
        unchanged_count: remote_count.saturating_sub(safe_writes),
    });
    (SyncState::with_phase(Phase::Watching, Vec::new()), effects)
}

fn conflicts_resolved(pending: &[Conflict], resolution: Resolution) -> (SyncState, Vec<Effect>) {
    let mut effects = match resolution {
        Resolution::Remote => apply_remote(pending),
        Resolution::Local => apply_local(pending),
    };

    effects.push(Effect::PersistState);
    effects.push(Effect::SyncComplete {
        total_count: pending.len(),
        updated_count: pending.len(),
        unchanged_count: 0,
    });
    (SyncState::with_phase(Phase::Watching, Vec::new()), effects)
}

/// Take the remote side: delete where remote is gone, write the rest silently
fn apply_remote(conflicts: &[Conflict]) -> Vec<Effect> {
    let mut deletes = Vec::new();
    let mut writes = Vec::new();
    for conflict in conflicts {
        match conflict.remote_content {
            None => deletes.push(conflict.file_name.clone()),
            Some(ref content) => writes.push(FileRecord {
                name: conflict.file_name.clone(),
                content: content.clone(),
                modified_at: conflict.remote_modified_at,
            }),
        }
    }

    let mut effects = Vec::new();
    if !deletes.is_empty() {
        effects.push(Effect::DeleteLocalFiles {
            file_names: deletes,
        });
    }
    if !writes.is_empty() {
        effects.push(Effect::WriteFiles {
            files: writes,
            silent: true,
            skip_echo: false,
        });
    }
    effects
}

/// Take the local side: push local content, ask the remote to delete where local is gone
fn apply_local(conflicts: &[Conflict]) -> Vec<Effect> {
    let mut deletes = Vec::new();
    let mut effects = Vec::new();
    for conflict in conflicts {
        match conflict.local_content {
            None => deletes.push(conflict.file_name.clone()),
            Some(ref content) => effects.push(Effect::SendLocalChange {
                file_name: conflict.file_name.clone(),
                content: content.clone(),
                force: true,
            }),
        }
    }

    if !deletes.is_empty() {
        effects.push(Effect::LocalInitiatedFileDelete {
            file_names: deletes,
            require_confirmation: false,
        });
    }
    effects
}
