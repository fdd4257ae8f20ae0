//! Status command handler
//!
//! Compares the files directory against the persisted sync state without
//! contacting the plugin, so it works while the daemon is stopped.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;

use codesync_core::hash::content_hash;
use codesync_core::paths::lookup_key;
use codesync_core::storage::{ProjectFiles, SyncStateStore};
use codesync_core::{Config, Timestamp};

use crate::output::{Output, OutputFormat};

/// Offline view of a project's sync status
#[derive(Debug, Default)]
pub struct ProjectStatus {
    pub files_dir: PathBuf,
    pub state_file: PathBuf,
    /// Why the persisted state could not be used, if it could not
    pub state_error: Option<String>,
    pub local_files: usize,
    pub tracked_files: usize,
    /// Changed locally since the last sync
    pub modified: Vec<String>,
    /// Never synced
    pub untracked: Vec<String>,
    /// Synced before, now absent locally
    pub missing: Vec<String>,
    pub last_remote_update: Option<Timestamp>,
}

impl ProjectStatus {
    pub fn collect(config: &Config) -> Result<Self> {
        let files = ProjectFiles::new(config.files_dir());
        let store = SyncStateStore::new(config.state_file_path());

        let mut status = ProjectStatus {
            files_dir: files.root().to_path_buf(),
            state_file: store.path().to_path_buf(),
            ..Default::default()
        };

        let persisted = match store.try_load() {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                status.state_error = Some(e.to_string());
                Default::default()
            }
        };
        status.tracked_files = persisted.files.len();
        status.last_remote_update = persisted.files.values().filter_map(|f| f.timestamp).max();

        let by_key: std::collections::HashMap<String, (&String, &str)> = persisted
            .files
            .iter()
            .map(|(name, f)| (lookup_key(name), (name, f.content_hash.as_str())))
            .collect();

        let local = files.list_files()?;
        status.local_files = local.len();

        let mut seen = HashSet::new();
        for file in &local {
            let key = file.key();
            seen.insert(key.clone());
            match by_key.get(&key) {
                Some((_, hash)) if *hash == content_hash(&file.content) => {}
                Some(_) => status.modified.push(file.name.clone()),
                None => status.untracked.push(file.name.clone()),
            }
        }

        status.missing = by_key
            .iter()
            .filter(|(key, _)| !seen.contains(*key))
            .map(|(_, (name, _))| (*name).clone())
            .collect();
        status.missing.sort();

        Ok(status)
    }

    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.untracked.is_empty() && self.missing.is_empty()
    }
}

fn format_timestamp(ms: Timestamp) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| ms.to_string())
}

/// Show status information
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let status = ProjectStatus::collect(config)?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "files_dir": status.files_dir,
                    "state_file": status.state_file,
                    "state_error": status.state_error,
                    "local_files": status.local_files,
                    "tracked_files": status.tracked_files,
                    "modified": status.modified,
                    "untracked": status.untracked,
                    "missing": status.missing,
                    "last_remote_update": status.last_remote_update,
                    "clean": status.is_clean()
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", if status.is_clean() { "clean" } else { "dirty" });
        }
        OutputFormat::Human => {
            println!("codesync Status");
            println!("===============");
            println!();
            println!("Files:   {}", status.files_dir.display());
            println!("State:   {}", status.state_file.display());
            if let Some(ref error) = status.state_error {
                println!("         (ignored: {})", error);
            }
            println!();
            println!("Local files:   {}", status.local_files);
            println!("Tracked files: {}", status.tracked_files);
            println!(
                "Last remote update: {}",
                status
                    .last_remote_update
                    .map(format_timestamp)
                    .unwrap_or_else(|| "(never)".to_string())
            );

            if status.is_clean() {
                println!();
                println!("Everything matches the last sync.");
            }
            for (label, names) in [
                ("Modified since last sync", &status.modified),
                ("Never synced", &status.untracked),
                ("Deleted locally", &status.missing),
            ] {
                if names.is_empty() {
                    continue;
                }
                println!();
                println!("{} ({}):", label, names.len());
                for name in names {
                    println!("  {}", name);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codesync_core::storage::{PersistedFileState, PersistedSyncState};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            project_dir: dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_empty_project_is_clean() {
        let dir = TempDir::new().unwrap();
        let status = ProjectStatus::collect(&config(&dir)).unwrap();

        assert!(status.is_clean());
        assert_eq!(status.local_files, 0);
        assert!(status.state_error.is_none());
    }

    #[test]
    fn test_classifies_against_persisted_state() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let files = ProjectFiles::new(config.files_dir());
        files.write_file("Same.tsx", "same").unwrap();
        files.write_file("Edited.tsx", "edited").unwrap();
        files.write_file("New.tsx", "new").unwrap();

        let mut state = PersistedSyncState::default();
        for (name, content, ts) in [
            ("Same.tsx", "same", 10),
            ("Edited.tsx", "base", 20),
            ("Gone.tsx", "gone", 30),
        ] {
            state.files.insert(
                name.to_string(),
                PersistedFileState {
                    timestamp: Some(ts),
                    content_hash: content_hash(content),
                },
            );
        }
        SyncStateStore::new(config.state_file_path())
            .save(&state)
            .unwrap();

        let status = ProjectStatus::collect(&config).unwrap();
        assert_eq!(status.local_files, 3);
        assert_eq!(status.tracked_files, 3);
        assert_eq!(status.modified, vec!["Edited.tsx".to_string()]);
        assert_eq!(status.untracked, vec!["New.tsx".to_string()]);
        assert_eq!(status.missing, vec!["Gone.tsx".to_string()]);
        assert_eq!(status.last_remote_update, Some(30));
        assert!(!status.is_clean());
    }

    #[test]
    fn test_corrupt_state_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.state_file_path().parent().unwrap()).unwrap();
        std::fs::write(config.state_file_path(), "{ not json").unwrap();

        let status = ProjectStatus::collect(&config).unwrap();
        assert!(status.state_error.is_some());
        assert_eq!(status.tracked_files, 0);
    }
}
