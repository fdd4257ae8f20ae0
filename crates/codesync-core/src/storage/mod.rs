//! Storage layer
//!
//! - **Project files**: the synced source files under `<project>/files`
//! - **Sync state**: per-file hash and remote timestamp as of the last
//!   confirmed sync, stored as versioned JSON under `<project>/.codesync`

pub mod error;
pub mod filesystem;
pub mod state_store;

pub use error::{StorageError, StorageResult};
pub use filesystem::{atomic_write, ProjectFiles};
pub use state_store::{
    PersistedFileState, PersistedSyncState, StateFlusher, SyncStateStore, STATE_VERSION,
};
