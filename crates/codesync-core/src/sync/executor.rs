//! Effect interpreter
//!
//! Each effect touches exactly one capability (peer, disk, metadata cache,
//! hash tracker, prompt coordinator) and may return follow-up events for the
//! engine to feed back into the state machine. Failures are logged per file
//! and never abort the rest of a batch.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::conflict::detect_conflicts;
use super::hash_tracker::HashTracker;
use super::machine::{Effect, LogLevel, SyncEvent};
use super::message::{ConflictVersionQuery, OutboundMessage};
use super::metadata::FileMetadataCache;
use super::prompt::PromptCoordinator;
use super::transport::Transport;
use crate::hash::content_hash;
use crate::models::FileRecord;
use crate::storage::ProjectFiles;

pub struct EffectExecutor {
    files: ProjectFiles,
    metadata: FileMetadataCache,
    tracker: HashTracker,
    prompts: PromptCoordinator,
    peer: Option<Arc<dyn Transport>>,
    /// Events that arrive after the effect returned (answered delete prompts)
    deferred: mpsc::UnboundedSender<SyncEvent>,
}

impl EffectExecutor {
    pub fn new(
        files: ProjectFiles,
        metadata: FileMetadataCache,
        tracker: HashTracker,
        deferred: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            files,
            metadata,
            tracker,
            prompts: PromptCoordinator::new(),
            peer: None,
            deferred,
        }
    }

    pub fn attach_peer(&mut self, peer: Arc<dyn Transport>) {
        debug!("Attached peer {}", peer.id());
        self.peer = Some(peer);
    }

    /// Forget the peer and cancel its outstanding prompts
    pub fn detach_peer(&mut self) -> Option<Arc<dyn Transport>> {
        self.prompts.cancel_all();
        self.peer.take()
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer.as_deref().map(|peer| peer.id())
    }

    pub fn files(&self) -> &ProjectFiles {
        &self.files
    }

    pub fn metadata(&self) -> &FileMetadataCache {
        &self.metadata
    }

    pub fn tracker(&self) -> &HashTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut HashTracker {
        &mut self.tracker
    }

    pub fn prompts_mut(&mut self) -> &mut PromptCoordinator {
        &mut self.prompts
    }

    /// Wait for queued state writes
    pub async fn shutdown(self) {
        self.metadata.shutdown().await;
    }

    /// Run one effect, returning follow-up events in order
    pub fn execute(&mut self, effect: Effect) -> Vec<SyncEvent> {
        match effect {
            Effect::InitWorkspace { project_name } => {
                if let Err(e) = self.files.ensure_root() {
                    warn!("Could not prepare files directory: {}", e);
                }
                info!(
                    "Session started for {} in {:?}",
                    project_name.as_deref().unwrap_or("unnamed project"),
                    self.files.root()
                );
                Vec::new()
            }

            Effect::LoadPersistedState => {
                self.metadata.ensure_loaded();
                Vec::new()
            }

            Effect::SendMessage(message) => {
                self.send(&message);
                Vec::new()
            }

            Effect::DetectConflicts { remote_files } => self.detect(remote_files),

            Effect::WriteFiles {
                files,
                silent,
                skip_echo,
            } => {
                self.write_files(files, silent, skip_echo);
                Vec::new()
            }

            Effect::DeleteLocalFiles { file_names } => {
                self.delete_files(&file_names);
                Vec::new()
            }

            Effect::SendLocalChange {
                file_name,
                content,
                force,
            } => {
                self.send_local_change(&file_name, &content, force);
                Vec::new()
            }

            Effect::LocalInitiatedFileDelete {
                file_names,
                require_confirmation,
            } => self.local_delete(file_names, require_confirmation),

            Effect::RequestConflictVersions { conflicts } => {
                let queries = conflicts
                    .iter()
                    .map(|c| ConflictVersionQuery {
                        file_name: c.file_name.clone(),
                        last_synced_at: c.last_synced_at,
                    })
                    .collect();
                debug!("Requesting remote versions for {} conflict(s)", conflicts.len());
                self.send(&OutboundMessage::ConflictVersionRequest { conflicts: queries });
                Vec::new()
            }

            Effect::RequestConflictDecisions { conflicts } => {
                match self.peer {
                    Some(ref peer) => {
                        if !self.prompts.request_conflict_decisions(peer.as_ref(), &conflicts) {
                            warn!("Could not send conflicts to {}", peer.id());
                        }
                    }
                    None => warn!("No peer to resolve {} conflict(s)", conflicts.len()),
                }
                Vec::new()
            }

            Effect::RecordUnchanged { files } => {
                for file in &files {
                    self.metadata
                        .record_sync(&file.name, &content_hash(&file.content), file.modified_at);
                }
                Vec::new()
            }

            Effect::RecordRemoteTimestamp {
                file_name,
                remote_modified_at,
            } => {
                if self.metadata.mark_synced(&file_name, remote_modified_at) {
                    debug!("Remote stored {}", file_name);
                    self.metadata.persist();
                } else {
                    debug!("Acknowledgement for untracked file {}", file_name);
                }
                Vec::new()
            }

            Effect::ForgetDeletedFiles { file_names } => {
                for name in &file_names {
                    self.tracker.forget(name);
                    self.tracker.clear_delete(name);
                    self.metadata.remove(name);
                }
                debug!("Forgot {} deleted file(s)", file_names.len());
                self.metadata.persist();
                Vec::new()
            }

            Effect::SendFileList => {
                match self.files.list_files() {
                    Ok(files) => {
                        self.send(&OutboundMessage::FileList { files });
                    }
                    Err(e) => warn!("Could not list files: {}", e),
                }
                Vec::new()
            }

            Effect::PersistState => {
                self.metadata.persist();
                Vec::new()
            }

            Effect::SyncComplete {
                total_count,
                updated_count,
                unchanged_count,
            } => {
                info!(
                    "Sync complete: {} files, {} updated, {} unchanged",
                    total_count, updated_count, unchanged_count
                );
                self.send(&OutboundMessage::SyncComplete {
                    total_count,
                    updated_count,
                    unchanged_count,
                });
                Vec::new()
            }

            Effect::Log { level, message } => {
                match level {
                    LogLevel::Debug => debug!("{}", message),
                    LogLevel::Info => info!("{}", message),
                    LogLevel::Warn => warn!("{}", message),
                }
                Vec::new()
            }
        }
    }

    fn send(&self, message: &OutboundMessage) -> bool {
        let Some(ref peer) = self.peer else {
            warn!("No peer connected, dropping outbound message");
            return false;
        };
        let sent = peer.send(message);
        if !sent {
            warn!("Failed to send message to {}", peer.id());
        }
        sent
    }

    fn detect(&mut self, remote_files: Vec<FileRecord>) -> Vec<SyncEvent> {
        let local_files = match self.files.list_files() {
            Ok(files) => files,
            Err(e) => {
                // An empty listing would read as "everything deleted locally"
                warn!("Could not list local files, snapshot not reconciled: {}", e);
                return Vec::new();
            }
        };

        let persisted = self.metadata.persisted_files();
        let analysis = detect_conflicts(&remote_files, &local_files, &persisted);
        vec![SyncEvent::ConflictsDetected { analysis }]
    }

    fn write_files(&mut self, files: Vec<FileRecord>, silent: bool, skip_echo: bool) {
        let mut written = 0;
        for file in files {
            if skip_echo && self.tracker.should_skip(&file.name, &file.content) {
                debug!("Skipping echo of {}", file.name);
                continue;
            }

            // The watcher may fire before write_file returns
            self.tracker.remember(&file.name, &file.content);
            self.tracker.clear_delete(&file.name);

            if let Err(e) = self.files.write_file(&file.name, &file.content) {
                warn!("Failed to write {}: {}", file.name, e);
                self.tracker.forget(&file.name);
                continue;
            }

            self.metadata
                .record_sync(&file.name, &content_hash(&file.content), file.modified_at);
            written += 1;
            if !silent {
                info!("Updated {}", file.name);
            }
        }

        if written > 0 {
            self.metadata.persist();
        }
    }

    fn delete_files(&mut self, file_names: &[String]) {
        for name in file_names {
            self.tracker.mark_delete(name);
            self.tracker.forget(name);

            if let Err(e) = self.files.delete_file(name) {
                warn!("Failed to delete {}: {}", name, e);
                self.tracker.clear_delete(name);
                continue;
            }

            self.metadata.remove(name);
            info!("Deleted {}", name);
        }
        self.metadata.persist();
    }

    fn send_local_change(&mut self, name: &str, content: &str, force: bool) {
        let hash = content_hash(content);
        if !force {
            if self.metadata.last_synced_hash(name) == Some(hash.as_str()) {
                debug!("{} unchanged since last sync", name);
                return;
            }
            if self.tracker.should_skip(name, content) {
                debug!("Skipping echo of our own write to {}", name);
                return;
            }
        }

        let message = OutboundMessage::FileChange {
            file_name: name.to_string(),
            content: content.to_string(),
        };
        if !self.send(&message) {
            return;
        }

        self.tracker.remember(name, content);
        self.metadata.record_local_change(name, &hash);
        info!("Sent {}", name);
    }

    fn local_delete(&mut self, file_names: Vec<String>, require_confirmation: bool) -> Vec<SyncEvent> {
        let genuine: Vec<String> = file_names
            .into_iter()
            .filter(|name| {
                let echo = self.tracker.should_skip_delete(name);
                if echo {
                    debug!("Skipping echo of our own delete of {}", name);
                }
                !echo
            })
            .collect();
        if genuine.is_empty() {
            return Vec::new();
        }

        let Some(ref peer) = self.peer else {
            warn!("No peer to delete {} file(s) on", genuine.len());
            return Vec::new();
        };

        let mut rx = self
            .prompts
            .request_delete_decision(peer.as_ref(), genuine, require_confirmation);

        match rx.try_recv() {
            Ok(confirmed) => approved(confirmed),
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("Delete request was not delivered; files left in place remotely");
                Vec::new()
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                self.await_decision(rx);
                Vec::new()
            }
        }
    }

    /// Wait for the user's answer off the sync loop
    fn await_decision(&self, rx: oneshot::Receiver<Vec<String>>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to await delete confirmation on");
            return;
        };

        let deferred = self.deferred.clone();
        runtime.spawn(async move {
            match rx.await {
                Ok(confirmed) => {
                    for event in approved(confirmed) {
                        if deferred.send(event).is_err() {
                            debug!("Sync loop gone, dropping delete decision");
                        }
                    }
                }
                Err(_) => debug!("Delete prompt cancelled"),
            }
        });
    }
}

fn approved(confirmed: Vec<String>) -> Vec<SyncEvent> {
    if confirmed.is_empty() {
        debug!("No deletions confirmed");
        return Vec::new();
    }
    vec![SyncEvent::LocalDeleteApproved {
        file_names: confirmed,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SyncStateStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl Transport for Recorder {
        fn id(&self) -> &str {
            "recorder"
        }

        fn send(&self, message: &OutboundMessage) -> bool {
            self.sent.lock().unwrap().push(message.clone());
            true
        }
    }

    fn executor() -> (TempDir, EffectExecutor, Arc<Recorder>) {
        let temp_dir = TempDir::new().unwrap();
        let files = ProjectFiles::new(temp_dir.path().join("files"));
        let metadata =
            FileMetadataCache::new(SyncStateStore::new(temp_dir.path().join("state.json")));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut executor = EffectExecutor::new(files, metadata, HashTracker::new(), tx);
        let recorder = Arc::new(Recorder::default());
        executor.attach_peer(recorder.clone());
        (temp_dir, executor, recorder)
    }

    #[test]
    fn test_write_remembers_hash_and_records_sync() {
        let (_dir, mut executor, _peer) = executor();
        executor.execute(Effect::WriteFiles {
            files: vec![FileRecord::new("A.tsx", "remote").with_modified_at(77)],
            silent: false,
            skip_echo: false,
        });

        assert_eq!(executor.files().read_file("A.tsx").unwrap().content, "remote");
        assert!(executor.tracker().should_skip("A.tsx", "remote"));
        let meta = executor.metadata().get("A.tsx").unwrap();
        assert_eq!(meta.last_synced_hash.as_deref(), Some(content_hash("remote").as_str()));
        assert_eq!(meta.last_remote_timestamp, Some(77));
    }

    #[test]
    fn test_skip_echo_filters_remembered_content() {
        let (_dir, mut executor, _peer) = executor();
        executor.tracker_mut().remember("A.tsx", "mine");

        executor.execute(Effect::WriteFiles {
            files: vec![FileRecord::new("A.tsx", "mine")],
            silent: false,
            skip_echo: true,
        });

        assert!(executor.files().read_file("A.tsx").is_err());
    }

    #[test]
    fn test_send_local_change_short_circuits() {
        let (_dir, mut executor, peer) = executor();
        executor.execute(Effect::WriteFiles {
            files: vec![FileRecord::new("A.tsx", "synced")],
            silent: true,
            skip_echo: false,
        });

        executor.execute(Effect::SendLocalChange {
            file_name: "A.tsx".to_string(),
            content: "synced".to_string(),
            force: false,
        });
        assert!(peer.sent.lock().unwrap().is_empty());

        executor.execute(Effect::SendLocalChange {
            file_name: "A.tsx".to_string(),
            content: "edited".to_string(),
            force: false,
        });
        assert_eq!(
            *peer.sent.lock().unwrap(),
            vec![OutboundMessage::FileChange {
                file_name: "A.tsx".to_string(),
                content: "edited".to_string(),
            }]
        );
        let meta = executor.metadata().get("A.tsx").unwrap();
        assert_eq!(meta.local_hash, content_hash("edited"));
        assert_eq!(meta.last_synced_hash.as_deref(), Some(content_hash("synced").as_str()));
    }

    #[test]
    fn test_forced_send_ignores_synced_hash() {
        let (_dir, mut executor, peer) = executor();
        executor.execute(Effect::RecordUnchanged {
            files: vec![FileRecord::new("A.tsx", "same")],
        });

        executor.execute(Effect::SendLocalChange {
            file_name: "A.tsx".to_string(),
            content: "same".to_string(),
            force: true,
        });
        assert_eq!(peer.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_send_without_peer_does_not_remember() {
        let (_dir, mut executor, _peer) = executor();
        executor.detach_peer();

        executor.execute(Effect::SendLocalChange {
            file_name: "A.tsx".to_string(),
            content: "x".to_string(),
            force: false,
        });
        assert!(!executor.tracker().should_skip("A.tsx", "x"));
        assert!(executor.metadata().get("A.tsx").is_none());
    }

    #[test]
    fn test_remote_delete_marks_before_removing() {
        let (_dir, mut executor, _peer) = executor();
        executor.execute(Effect::WriteFiles {
            files: vec![FileRecord::new("A.tsx", "x")],
            silent: true,
            skip_echo: false,
        });

        executor.execute(Effect::DeleteLocalFiles {
            file_names: vec!["A.tsx".to_string(), "Missing.tsx".to_string()],
        });

        assert!(executor.files().read_file("A.tsx").is_err());
        assert!(executor.metadata().get("A.tsx").is_none());
        assert!(executor.tracker_mut().should_skip_delete("A.tsx"));
    }

    #[test]
    fn test_failed_write_does_not_stop_batch() {
        let (_dir, mut executor, _peer) = executor();
        executor.files().write_file("Blocker.tsx", "plain file").unwrap();

        executor.execute(Effect::WriteFiles {
            files: vec![
                FileRecord::new("A.tsx", "a"),
                FileRecord::new("Blocker.tsx/Inner.tsx", "unwritable"),
                FileRecord::new("B.tsx", "b"),
            ],
            silent: false,
            skip_echo: true,
        });

        assert_eq!(executor.files().read_file("A.tsx").unwrap().content, "a");
        assert_eq!(executor.files().read_file("B.tsx").unwrap().content, "b");
        assert!(executor.metadata().get("A.tsx").is_some());
        assert!(executor.metadata().get("B.tsx").is_some());

        assert!(!executor.tracker().should_skip("Blocker.tsx/Inner.tsx", "unwritable"));
        assert!(executor.metadata().get("Blocker.tsx/Inner.tsx").is_none());
    }

    #[test]
    fn test_failed_delete_does_not_stop_batch() {
        let (_dir, mut executor, _peer) = executor();
        executor.execute(Effect::WriteFiles {
            files: vec![FileRecord::new("A.tsx", "a"), FileRecord::new("B.tsx", "b")],
            silent: true,
            skip_echo: false,
        });
        let folder = executor.files().root().join("Folder.tsx");
        std::fs::create_dir_all(&folder).unwrap();

        executor.execute(Effect::DeleteLocalFiles {
            file_names: vec![
                "A.tsx".to_string(),
                "Folder.tsx".to_string(),
                "B.tsx".to_string(),
            ],
        });

        assert!(executor.files().read_file("A.tsx").is_err());
        assert!(executor.files().read_file("B.tsx").is_err());
        assert!(executor.metadata().get("A.tsx").is_none());
        assert!(executor.metadata().get("B.tsx").is_none());

        assert!(folder.is_dir());
        assert!(!executor.tracker_mut().should_skip_delete("Folder.tsx"));
        assert!(executor.tracker_mut().should_skip_delete("B.tsx"));
    }

    #[test]
    fn test_local_delete_filters_echoes_and_approves_unconfirmed() {
        let (_dir, mut executor, peer) = executor();
        executor.tracker_mut().mark_delete("Echo.tsx");

        let events = executor.execute(Effect::LocalInitiatedFileDelete {
            file_names: vec!["Echo.tsx".to_string(), "Real.tsx".to_string()],
            require_confirmation: false,
        });

        assert_eq!(
            events,
            vec![SyncEvent::LocalDeleteApproved {
                file_names: vec!["Real.tsx".to_string()]
            }]
        );
        assert_eq!(
            *peer.sent.lock().unwrap(),
            vec![OutboundMessage::FileDelete {
                file_names: vec!["Real.tsx".to_string()],
                require_confirmation: false,
            }]
        );
    }

    #[test]
    fn test_detect_conflicts_uses_disk_and_metadata() {
        let (_dir, mut executor, _peer) = executor();
        executor.files().write_file("Local.tsx", "l").unwrap();

        let events = executor.execute(Effect::DetectConflicts {
            remote_files: vec![FileRecord::new("Remote.tsx", "r")],
        });

        match events.as_slice() {
            [SyncEvent::ConflictsDetected { analysis }] => {
                assert_eq!(analysis.writes.len(), 1);
                assert_eq!(analysis.local_only.len(), 1);
            }
            other => panic!("Expected CONFLICTS_DETECTED, got {:?}", other),
        }
    }
}
