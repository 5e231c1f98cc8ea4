//! In-memory content-addressed storage backend.

use std::collections::HashMap;
use std::sync::RwLock;

use brook_types::ContentId;
use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{ChunkStore, id_matches_data};

/// In-memory store backed by a `RwLock<HashMap>`.
///
/// Useful for testing and for nodes configured to run in memory-only mode.
/// Applies the same verify-before-write discipline as the file backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<ContentId, Bytes>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes currently stored.
    pub fn used_bytes(&self) -> u64 {
        let map = self.entries.read().expect("lock poisoned");
        map.values().map(|v| v.len() as u64).sum()
    }

    /// Replace an entry's bytes without verification (test corruption hook).
    #[cfg(test)]
    pub(crate) fn corrupt(&self, id: ContentId, data: Bytes) {
        let mut map = self.entries.write().expect("lock poisoned");
        map.insert(id, data);
    }
}

#[async_trait::async_trait]
impl ChunkStore for MemoryStore {
    async fn put(&self, id: ContentId, data: Bytes) -> Result<(), StoreError> {
        if !id_matches_data(&id, &data) {
            return Err(StoreError::IntegrityMismatch { id });
        }
        let mut map = self.entries.write().expect("lock poisoned");
        debug!(%id, size = data.len(), "storing entry in memory");
        map.insert(id, data);
        Ok(())
    }

    async fn try_get(&self, id: ContentId) -> Result<Option<Bytes>, StoreError> {
        let map = self.entries.read().expect("lock poisoned");
        match map.get(&id) {
            Some(data) if !id_matches_data(&id, data) => Err(StoreError::Corrupt { id }),
            Some(data) => Ok(Some(data.clone())),
            None => Ok(None),
        }
    }

    async fn contains(&self, id: ContentId) -> Result<bool, StoreError> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.contains_key(&id))
    }

    async fn delete(&self, id: ContentId) -> Result<(), StoreError> {
        let mut map = self.entries.write().expect("lock poisoned");
        match map.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn list(&self) -> Result<Vec<ContentId>, StoreError> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.keys().copied().collect())
    }

    async fn verify(&self, id: ContentId) -> Result<bool, StoreError> {
        let map = self.entries.read().expect("lock poisoned");
        match map.get(&id) {
            Some(data) => Ok(id_matches_data(&id, data)),
            None => Err(StoreError::NotFound(id)),
        }
    }
}
