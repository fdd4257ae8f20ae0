//! Data models shared by the sync engine and the wire protocol

use serde::{Deserialize, Serialize};

use crate::paths::lookup_key;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// A file as known to one side (local disk or remote peer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Normalized, case-preserving relative path
    pub name: String,
    /// Full text content
    pub content: String,
    /// Last modification time reported by the owning side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<Timestamp>,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            modified_at: None,
        }
    }

    /// Set the modification timestamp
    pub fn with_modified_at(mut self, modified_at: Timestamp) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Case-insensitive key for matching across sides
    pub fn key(&self) -> String {
        lookup_key(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_serialization() {
        let record = FileRecord::new("App.tsx", "export {}").with_modified_at(1_700_000_000_000);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["name"], "App.tsx");
        assert_eq!(json["modifiedAt"], 1_700_000_000_000i64);

        let without_time: FileRecord =
            serde_json::from_str(r#"{"name":"a.ts","content":"x"}"#).unwrap();
        assert!(without_time.modified_at.is_none());
    }

    #[test]
    fn test_file_record_key() {
        let record = FileRecord::new("Components/Hero", "");
        assert_eq!(record.key(), "components/hero.tsx");
    }
}
