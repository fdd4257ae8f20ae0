//! codesync core library
//!
//! Two-way synchronization between a local project directory and a
//! design-tool plugin that connects over WebSocket.
//!
//! # Architecture
//!
//! - **State machine**: a pure `transition(state, event) -> (state, effects)`
//!   is the only place lifecycle decisions are made
//! - **Executor**: interprets effects against disk, the peer and the
//!   metadata cache, feeding follow-up events back depth-first
//! - **Persisted state**: per-file hash and remote timestamp as of the last
//!   confirmed sync, so offline edits are recognized after a restart
//!
//! # Modules
//!
//! - `sync`: state machine, executor, conflict handling, server and daemon
//! - `storage`: files directory access and persisted sync state
//! - `paths`: path normalization and lookup keys
//! - `config`: daemon configuration

pub mod config;
pub mod hash;
pub mod models;
pub mod paths;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use models::{FileRecord, Timestamp};
pub use storage::{StorageError, StorageResult};
