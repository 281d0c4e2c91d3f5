//! In-memory snapshot store.

use super::{SnapshotStore, StorageError, StorageResult};
use crate::ops::Operation;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    rooms: RwLock<HashMap<String, Vec<Operation>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, room_id: &str, history: &[Operation]) -> StorageResult<()> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
        rooms.insert(room_id.to_string(), history.to_vec());
        Ok(())
    }

    fn load(&self, room_id: &str) -> StorageResult<Vec<Operation>> {
        let rooms = self
            .rooms
            .read()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
        rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| StorageError::NoSnapshot(room_id.to_string()))
    }
}
