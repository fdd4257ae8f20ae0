//! Sync engine
//!
//! Keeps the local files directory and one connected plugin in step.
//!
//! ## Flow
//!
//! 1. The plugin connects over WebSocket and sends `handshake`
//! 2. We load persisted state and ask for its file list
//! 3. The snapshot is reconciled against disk and persisted state
//! 4. Conflicts are auto-resolved where one side is provably stale;
//!    the rest go to the user
//! 5. Live edits flow both ways until the plugin disconnects
//!
//! ## Usage
//!
//! ```ignore
//! let config = Config::load()?;
//! sync::serve(&config, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

pub mod conflict;
pub mod daemon;
pub mod engine;
pub mod executor;
pub mod hash_tracker;
pub mod machine;
pub mod message;
pub mod metadata;
pub mod prompt;
pub mod resolve;
pub mod server;
pub mod transport;
pub mod validator;
pub mod watcher;

pub use conflict::{detect_conflicts, Conflict, ConflictAnalysis};
pub use daemon::{build_engine, serve, Daemon};
pub use engine::SyncEngine;
pub use executor::EffectExecutor;
pub use hash_tracker::HashTracker;
pub use machine::{transition, Effect, SyncEvent, SyncMachine, SyncMode, SyncState};
pub use message::{InboundMessage, OutboundMessage, Resolution};
pub use metadata::FileMetadataCache;
pub use resolve::{auto_resolve, AutoResolution, REMOTE_DRIFT_MS};
pub use server::{PeerEvent, SyncServer};
pub use transport::{PeerHandle, Transport, TransportError};
pub use watcher::{FileWatcher, WatcherEvent, WatcherEventKind};
