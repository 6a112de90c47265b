//! State store sink receiving replayed changelog records.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::Result;

/// Applies replayed changelog records to a local key-value store.
pub trait StateRestoreSink: Send {
    /// Apply one record. A `None` value is a tombstone for the key; stores
    /// that materialize deletes interpret it, others may ignore it.
    fn restore(&mut self, key: &Bytes, value: Option<&Bytes>) -> Result<()>;
}

/// Map-backed store for tests and embedding.
///
/// Cloning yields a handle onto the same underlying map, so a caller can
/// keep one handle while a restorer owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<Bytes, Bytes>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value currently held for `key`.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all entries, as a reinitialized store would.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl StateRestoreSink for InMemoryStore {
    fn restore(&mut self, key: &Bytes, value: Option<&Bytes>) -> Result<()> {
        let mut entries = self.entries.lock();
        match value {
            Some(value) => {
                entries.insert(key.clone(), value.clone());
            }
            None => {
                entries.remove(&key[..]);
            }
        }
        Ok(())
    }
}
