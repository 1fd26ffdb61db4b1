//! In-memory key/value storage.
//!
//! A plain owned map. The event loop is the only thread that touches it, so
//! there is no locking: every read and mutation is serialized by the loop.

use std::collections::HashMap;
use tracing::trace;

/// Owned key/value store.
#[derive(Debug, Default)]
pub struct Storage {
    data: HashMap<Vec<u8>, Vec<u8>>,
    /// Bytes held by keys and values.
    memory_used: usize,
}

impl Storage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        let new_size = key.len() + value.len();

        match self.data.get_mut(key) {
            Some(existing) => {
                self.memory_used -= key.len() + existing.len();
                existing.clear();
                existing.extend_from_slice(value);
            }
            None => {
                self.data.insert(key.to_vec(), value.to_vec());
            }
        }
        self.memory_used += new_size;

        trace!(
            key_len = key.len(),
            value_len = value.len(),
            memory_used = self.memory_used,
            "Stored item"
        );
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.data.remove(key) {
            Some(value) => {
                self.memory_used -= key.len() + value.len();
                trace!(key_len = key.len(), "Deleted item");
                true
            }
            None => false,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate bytes held by keys and values.
    pub fn memory_used(&self) -> usize {
        self.memory_used
    }
}
