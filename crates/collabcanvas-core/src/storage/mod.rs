//! Local snapshot persistence.
//!
//! A snapshot is the full history of a room, overwritten wholesale on every
//! change. Persistence is best-effort: the session logs failures and carries
//! on.

mod file;
mod memory;

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;

use crate::ops::Operation;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Why a room snapshot could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The room has never been saved. Callers treat this as an empty history.
    #[error("No snapshot for room {0}")]
    NoSnapshot(String),
    #[error("Snapshot is not a valid history: {0}")]
    Corrupt(String),
    #[error("Could not encode history: {0}")]
    Encode(String),
    #[error("Snapshot file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Io { path, source }
    }
}

/// Room id reduced to characters that are safe in a file name.
pub(crate) fn safe_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for snapshot backends.
///
/// Calls complete synchronously: the engine runs a single-threaded reactor
/// and snapshots are small.
pub trait SnapshotStore: Send + Sync {
    /// Overwrite the snapshot for `room_id`.
    fn save(&self, room_id: &str, history: &[Operation]) -> StorageResult<()>;

    /// Load the snapshot for `room_id`.
    fn load(&self, room_id: &str) -> StorageResult<Vec<Operation>>;

    /// Load the snapshot, or an empty history if there is none or it cannot
    /// be read.
    fn load_if_available(&self, room_id: &str) -> Vec<Operation> {
        match self.load(room_id) {
            Ok(ops) => ops,
            Err(StorageError::NoSnapshot(_)) => Vec::new(),
            Err(e) => {
                log::warn!("Ignoring unreadable snapshot for {}: {}", room_id, e);
                Vec::new()
            }
        }
    }
}

/// A shared store, e.g. one store used by several sessions.
impl<S: SnapshotStore + ?Sized> SnapshotStore for Arc<S> {
    fn save(&self, room_id: &str, history: &[Operation]) -> StorageResult<()> {
        (**self).save(room_id, history)
    }

    fn load(&self, room_id: &str) -> StorageResult<Vec<Operation>> {
        (**self).load(room_id)
    }
}

/// Serialize a history as the snapshot JSON array.
pub fn history_to_json(history: &[Operation]) -> StorageResult<String> {
    serde_json::to_string(history).map_err(|e| StorageError::Encode(e.to_string()))
}

/// Parse a snapshot JSON array.
pub fn history_from_json(json: &str) -> StorageResult<Vec<Operation>> {
    serde_json::from_str(json).map_err(|e| StorageError::Corrupt(e.to_string()))
}
