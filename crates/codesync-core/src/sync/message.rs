//! Wire protocol message types
//!
//! JSON text frames exchanged with the plugin. Every message carries a
//! kebab-case `type` tag; fields are camelCase.

use serde::{Deserialize, Serialize};

use super::conflict::Conflict;
use crate::models::{FileRecord, Timestamp};

/// Which side wins a manual conflict decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Remote,
}

/// Remote modification time for one conflicted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictVersion {
    pub file_name: String,
    #[serde(default)]
    pub latest_remote_version_ms: Option<Timestamp>,
}

/// What we ask the plugin about one conflicted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictVersionQuery {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
}

/// Messages received from the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// First message of every connection
    #[serde(rename_all = "camelCase")]
    Handshake {
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        project_name: Option<String>,
    },

    /// The plugin wants our current file list
    RequestFiles,

    /// Full remote snapshot
    FileList { files: Vec<FileRecord> },

    /// A single remote edit
    FileChange { file: FileRecord },

    /// Files removed remotely
    #[serde(rename_all = "camelCase")]
    FileDelete { file_names: Vec<String> },

    /// The user approved deleting these files remotely
    #[serde(rename_all = "camelCase")]
    DeleteConfirmed { file_names: Vec<String> },

    /// The user refused; the remote contents come back for restoring
    DeleteCancelled { files: Vec<FileRecord> },

    /// The plugin stored a file we sent
    #[serde(rename_all = "camelCase")]
    FileSynced {
        file_name: String,
        #[serde(default)]
        remote_modified_at: Option<Timestamp>,
    },

    /// Manual decision for every pending conflict
    ConflictsResolved { resolution: Resolution },

    /// Answer to a conflict-version-request
    ConflictVersionResponse { versions: Vec<ConflictVersion> },
}

/// Messages sent to the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    RequestFiles,

    FileList { files: Vec<FileRecord> },

    #[serde(rename_all = "camelCase")]
    FileChange { file_name: String, content: String },

    #[serde(rename_all = "camelCase")]
    FileDelete {
        file_names: Vec<String>,
        require_confirmation: bool,
    },

    /// Conflicts the user has to decide
    ConflictsDetected { conflicts: Vec<Conflict> },

    ConflictVersionRequest { conflicts: Vec<ConflictVersionQuery> },

    #[serde(rename_all = "camelCase")]
    SyncComplete {
        total_count: usize,
        updated_count: usize,
        unchanged_count: usize,
    },
}

impl InboundMessage {
    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Tag name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Handshake { .. } => "handshake",
            InboundMessage::RequestFiles => "request-files",
            InboundMessage::FileList { .. } => "file-list",
            InboundMessage::FileChange { .. } => "file-change",
            InboundMessage::FileDelete { .. } => "file-delete",
            InboundMessage::DeleteConfirmed { .. } => "delete-confirmed",
            InboundMessage::DeleteCancelled { .. } => "delete-cancelled",
            InboundMessage::FileSynced { .. } => "file-synced",
            InboundMessage::ConflictsResolved { .. } => "conflicts-resolved",
            InboundMessage::ConflictVersionResponse { .. } => "conflict-version-response",
        }
    }
}

impl OutboundMessage {
    /// Encode as a JSON text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
