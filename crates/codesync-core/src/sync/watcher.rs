//! Filesystem watcher for the files directory
//!
//! Wraps a recursive `notify` watcher and turns raw events into normalized
//! [`WatcherEvent`]s, reading file content on the notify thread so the sync
//! loop never touches the disk for a watcher event.

use std::path::Path;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::paths::is_supported;
use crate::storage::ProjectFiles;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEventKind {
    Add,
    Change,
    Delete,
}

/// A local change in the files directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub kind: WatcherEventKind,
    /// Normalized path relative to the files directory
    pub relative_path: String,
    /// Current content for add and change
    pub content: Option<String>,
}

impl WatcherEvent {
    pub fn add(relative_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: WatcherEventKind::Add,
            relative_path: relative_path.into(),
            content: Some(content.into()),
        }
    }

    pub fn change(relative_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: WatcherEventKind::Change,
            relative_path: relative_path.into(),
            content: Some(content.into()),
        }
    }

    pub fn delete(relative_path: impl Into<String>) -> Self {
        Self {
            kind: WatcherEventKind::Delete,
            relative_path: relative_path.into(),
            content: None,
        }
    }
}

/// Keeps the underlying watcher alive; dropping it stops event delivery
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `files.root()` recursively and forward events to `tx`
    pub fn spawn(
        files: &ProjectFiles,
        tx: mpsc::UnboundedSender<WatcherEvent>,
    ) -> notify::Result<Self> {
        let root = files
            .root()
            .canonicalize()
            .unwrap_or_else(|_| files.root().to_path_buf());
        let reader = ProjectFiles::new(root.clone());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for watcher_event in classify(&reader, &event) {
                    if tx.send(watcher_event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        debug!("Watching {:?}", root);

        Ok(Self { _watcher: watcher })
    }
}

/// Map one notify event to zero or more watcher events
pub fn classify(files: &ProjectFiles, event: &Event) -> Vec<WatcherEvent> {
    event
        .paths
        .iter()
        .filter_map(|path| classify_path(files, &event.kind, path))
        .collect()
}

fn classify_path(files: &ProjectFiles, kind: &EventKind, path: &Path) -> Option<WatcherEvent> {
    let name = files.relative_name(path)?;
    if !is_supported(&name) {
        return None;
    }

    match kind {
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            Some(WatcherEvent::delete(name))
        }
        EventKind::Create(_) | EventKind::Modify(_) => {
            if !path.is_file() {
                // Renamed away or removed before we looked
                return (!path.exists()).then(|| WatcherEvent::delete(name));
            }
            let record = match files.read_file(&name) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Could not read changed file {}: {}", name, e);
                    return None;
                }
            };
            Some(match kind {
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => {
                    WatcherEvent::add(name, record.content)
                }
                _ => WatcherEvent::change(name, record.content),
            })
        }
        _ => None,
    }
}
