//! File-backed snapshot store.

use super::{history_from_json, history_to_json, safe_file_stem, SnapshotStore, StorageError, StorageResult};
use crate::ops::Operation;
use std::fs;
use std::path::{Path, PathBuf};

/// Stores each room's snapshot as a JSON file in a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_path: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::io(&base_path))?;
        }
        Ok(Self { base_path })
    }

    /// Create a store in the platform data directory, e.g.
    /// `~/.local/share/collabcanvas/rooms/` on Linux.
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Unavailable("could not determine home directory".to_string()))?;
        Self::new(base.join("collabcanvas").join("rooms"))
    }

    fn snapshot_path(&self, room_id: &str) -> PathBuf {
        self.base_path
            .join(format!("collabcanvas-history_{}.json", safe_file_stem(room_id)))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, room_id: &str, history: &[Operation]) -> StorageResult<()> {
        let path = self.snapshot_path(room_id);
        let json = history_to_json(history)?;
        fs::write(&path, json).map_err(StorageError::io(&path))
    }

    fn load(&self, room_id: &str) -> StorageResult<Vec<Operation>> {
        let path = self.snapshot_path(room_id);
        if !path.exists() {
            return Err(StorageError::NoSnapshot(room_id.to_string()));
        }
        let json = fs::read_to_string(&path).map_err(StorageError::io(&path))?;
        history_from_json(&json)
    }
}
