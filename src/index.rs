//! The dynamic mapping from string ids to chunks.

use crate::chunk::ChunkHandle;
use std::collections::HashMap;

/// Outcome of a registration attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Registration {
    Registered,
    /// The id was already taken; the existing mapping is untouched.
    Duplicate,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct IdIndex {
    map: HashMap<String, ChunkHandle>,
}

impl IdIndex {
    pub fn register(&mut self, id: &str, chunk: ChunkHandle) -> Registration {
        if self.map.contains_key(id) {
            Registration::Duplicate
        } else {
            self.map.insert(id.to_owned(), chunk);
            Registration::Registered
        }
    }

    /// Removes the mapping for `id`, but only if it points at `chunk`;
    /// chunks that lost a duplicate registration never owned the entry.
    pub fn deregister(&mut self, id: &str, chunk: ChunkHandle) {
        if self.map.get(id) == Some(&chunk) {
            self.map.remove(id);
        }
    }

    pub fn lookup(&self, id: &str) -> Option<ChunkHandle> {
        self.map.get(id).copied()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
