//! Room blob store boundary.
//!
//! The backing store is a plain key-value blob store: one JSON blob per room
//! id, no schema awareness. The server owns all interpretation of blob
//! contents; the store only moves strings.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ParlorError, ParlorResult};

/// Key-value blob store keyed by room id.
pub trait RoomStore: Send + Sync {
    /// Fetch the stored blob, or `None` when the room has never been written.
    fn get(&self, room_id: &str) -> ParlorResult<Option<String>>;

    /// Persist the blob for a room, creating the room if needed.
    fn put(&self, room_id: &str, raw: &str) -> ParlorResult<()>;

    /// Remove the room's blob. Deleting an absent room is not an error.
    fn delete(&self, room_id: &str) -> ParlorResult<()>;
}

/// In-memory store, the default backend for tests and single-process
/// deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms currently stored.
    pub fn len(&self) -> usize {
        self.rooms.lock().map(|rooms| rooms.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RoomStore for MemoryStore {
    fn get(&self, room_id: &str) -> ParlorResult<Option<String>> {
        let rooms = self
            .rooms
            .lock()
            .map_err(|_| ParlorError::store("room store lock poisoned"))?;
        Ok(rooms.get(room_id).cloned())
    }

    fn put(&self, room_id: &str, raw: &str) -> ParlorResult<()> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| ParlorError::store("room store lock poisoned"))?;
        rooms.insert(room_id.to_string(), raw.to_string());
        Ok(())
    }

    fn delete(&self, room_id: &str) -> ParlorResult<()> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| ParlorError::store("room store lock poisoned"))?;
        rooms.remove(room_id);
        Ok(())
    }
}
