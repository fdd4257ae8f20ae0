//! The sync daemon
//!
//! A single task owns the [`SyncEngine`] and drains every input source
//! (peer messages, connection closes, watcher events, answered prompts) one
//! at a time, so no two external events ever race on the sync state.
//!
//! Only one peer is active at a time. A handshake from a new connection
//! replaces the current peer; messages from any other connection are
//! ignored.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use super::executor::EffectExecutor;
use super::hash_tracker::HashTracker;
use super::machine::{SyncEvent, SyncMachine};
use super::message::InboundMessage;
use super::metadata::FileMetadataCache;
use super::resolve::REMOTE_DRIFT_MS;
use super::server::{PeerEvent, SyncServer};
use super::transport::{PeerHandle, Transport};
use super::watcher::{FileWatcher, WatcherEvent};
use crate::config::Config;
use crate::models::FileRecord;
use crate::paths::{ensure_extension, normalize_path};
use crate::storage::{ProjectFiles, StateFlusher, SyncStateStore};

pub struct Daemon {
    engine: SyncEngine,
    active: Option<PeerHandle>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    watcher_rx: mpsc::UnboundedReceiver<WatcherEvent>,
    deferred_rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl Daemon {
    pub fn new(
        engine: SyncEngine,
        peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        watcher_rx: mpsc::UnboundedReceiver<WatcherEvent>,
        deferred_rx: mpsc::UnboundedReceiver<SyncEvent>,
    ) -> Self {
        Self {
            engine,
            active: None,
            peer_rx,
            watcher_rx,
            deferred_rx,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.active.as_ref().map(|peer| peer.id())
    }

    /// Drain inputs until `shutdown` resolves or every source closes
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(event) = self.peer_rx.recv() => self.on_peer_event(event),
                Some(event) = self.watcher_rx.recv() => self.on_watcher_event(event),
                Some(event) = self.deferred_rx.recv() => self.on_deferred_event(event),
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                else => break,
            }
        }

        if let Some(peer) = self.active.take() {
            peer.close();
            self.engine.disconnect();
        }
        self.engine.shutdown().await;
    }

    pub fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Message { peer, message } => self.on_message(peer, message),
            PeerEvent::Closed { peer_id } => {
                if self.active_peer() == Some(peer_id.as_str()) {
                    info!("Active peer {} left", peer_id);
                    self.active = None;
                    self.engine.disconnect();
                }
            }
        }
    }

    pub fn on_watcher_event(&mut self, event: WatcherEvent) {
        self.engine.handle(SyncEvent::Watcher(event));
    }

    /// An event produced after its effect returned, such as an answered prompt
    pub fn on_deferred_event(&mut self, event: SyncEvent) {
        self.engine.handle(event);
    }

    fn on_message(&mut self, peer: PeerHandle, message: InboundMessage) {
        let is_active = self.active_peer() == Some(peer.id());

        if let InboundMessage::Handshake {
            project_id,
            project_name,
        } = message
        {
            if !is_active {
                if let Some(previous) = self.active.take() {
                    info!("Peer {} replaces {}", peer.id(), previous.id());
                    previous.close();
                    self.engine.disconnect();
                }
                info!(
                    "Handshake from {} for project {}",
                    peer.id(),
                    project_id.as_deref().unwrap_or("<unknown>")
                );
                self.active = Some(peer.clone());
                self.engine.connect(Arc::new(peer));
            }
            self.engine.handle(SyncEvent::Handshake { project_name });
            return;
        }

        if !is_active {
            debug!("Ignoring {} from inactive peer {}", message.kind(), peer.id());
            return;
        }

        match message {
            InboundMessage::Handshake { .. } => {}
            InboundMessage::RequestFiles => self.engine.handle(SyncEvent::RequestFiles),
            InboundMessage::FileList { files } => self.engine.handle(SyncEvent::RemoteFileList {
                files: sanitize_records(files),
            }),
            InboundMessage::FileChange { file } => {
                if let Some(file) = sanitize_record(file) {
                    self.engine.handle(SyncEvent::RemoteFileChange { file });
                }
            }
            InboundMessage::FileDelete { file_names } => {
                self.engine.handle(SyncEvent::RemoteFileDelete {
                    file_names: sanitize_names(file_names),
                })
            }
            InboundMessage::DeleteConfirmed { file_names } => {
                self.engine.delete_confirmed(&sanitize_names(file_names))
            }
            InboundMessage::DeleteCancelled { files } => {
                self.engine.delete_cancelled(sanitize_records(files))
            }
            InboundMessage::FileSynced {
                file_name,
                remote_modified_at,
            } => self.engine.handle(SyncEvent::FileSynced {
                file_name: ensure_extension(&file_name),
                remote_modified_at,
            }),
            InboundMessage::ConflictsResolved { resolution } => {
                self.engine.handle(SyncEvent::ConflictsResolved { resolution })
            }
            InboundMessage::ConflictVersionResponse { versions } => {
                self.engine.handle(SyncEvent::ConflictVersionResponse { versions })
            }
        }
    }
}

fn sanitize_record(mut file: FileRecord) -> Option<FileRecord> {
    if normalize_path(&file.name).is_empty() {
        warn!("Dropping remote file with empty name");
        return None;
    }
    file.name = ensure_extension(&file.name);
    Some(file)
}

fn sanitize_records(files: Vec<FileRecord>) -> Vec<FileRecord> {
    files.into_iter().filter_map(sanitize_record).collect()
}

fn sanitize_names(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| !normalize_path(name).is_empty())
        .map(|name| ensure_extension(&name))
        .collect()
}

/// Build the engine for a project directory
pub fn build_engine(
    config: &Config,
    metadata: FileMetadataCache,
    deferred: mpsc::UnboundedSender<SyncEvent>,
) -> SyncEngine {
    let files = ProjectFiles::new(config.files_dir());
    let tracker = HashTracker::with_delete_ttl(config.delete_echo_ttl());
    let executor = EffectExecutor::new(files, metadata, tracker, deferred);
    let machine = SyncMachine {
        remote_drift_ms: i64::try_from(config.remote_drift().as_millis()).unwrap_or(REMOTE_DRIFT_MS),
        confirm_deletes: config.confirm_deletes,
    };
    SyncEngine::new(machine, executor)
}

/// Run the daemon until `shutdown` resolves
pub async fn serve<F>(config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let files = ProjectFiles::new(config.files_dir());
    files
        .ensure_root()
        .with_context(|| format!("Failed to create {:?}", files.root()))?;

    let store = SyncStateStore::new(config.state_file_path());
    let mut metadata =
        FileMetadataCache::new(store.clone()).with_flusher(StateFlusher::spawn(store));
    metadata.load();

    let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
    let engine = build_engine(config, metadata, deferred_tx);

    let server = SyncServer::bind(config.listen_addr()?).await?;
    info!("Listening on ws://{}", server.local_addr()?);
    info!("Syncing {:?}", files.root());

    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let server_task = tokio::spawn(server.run(peer_tx));

    let (watcher_tx, watcher_rx) = mpsc::unbounded_channel();
    let _watcher = FileWatcher::spawn(&files, watcher_tx)
        .with_context(|| format!("Failed to watch {:?}", files.root()))?;

    Daemon::new(engine, peer_rx, watcher_rx, deferred_rx)
        .run(shutdown)
        .await;

    server_task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_engine_takes_policy_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            project_dir: temp_dir.path().to_path_buf(),
            remote_drift_ms: 750,
            confirm_deletes: false,
            ..Config::default()
        };
        let metadata = FileMetadataCache::new(SyncStateStore::new(config.state_file_path()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let engine = build_engine(&config, metadata, tx);
        assert_eq!(engine.machine().remote_drift_ms, 750);
        assert!(!engine.machine().confirm_deletes);
        assert_eq!(engine.executor().files().root(), config.files_dir().as_path());
    }

    #[test]
    fn test_sanitize_names_drops_empty_and_adds_extension() {
        let names = vec!["Hero".to_string(), "./".to_string(), "a/b.css".to_string()];
        assert_eq!(sanitize_names(names), vec!["Hero.tsx", "a/b.css"]);
    }
}
