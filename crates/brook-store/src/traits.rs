//! Core trait for content-addressed storage.

use brook_types::{ContentId, HashAlgorithm};
use bytes::Bytes;

use crate::error::StoreError;

/// Check whether `data` hashes to `id` under any supported algorithm.
///
/// Identifiers do not record which algorithm produced them (the manifest
/// does), so the store accepts a write if either supported 256-bit digest
/// matches.
pub fn id_matches_data(id: &ContentId, data: &[u8]) -> bool {
    id.matches(HashAlgorithm::Blake3, data) || id.matches(HashAlgorithm::Sha256, data)
}

/// Trait for storing and retrieving content-addressed entries — chunks and
/// serialized manifests, keyed by their [`ContentId`].
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Data is passed as [`Bytes`] to enable zero-copy transfers through the
/// pipeline.
///
/// Every implementation upholds the same invariants:
/// - `put` verifies `data` against `id` *before* writing and rejects a
///   mismatch with [`StoreError::IntegrityMismatch`];
/// - writes are atomic — a concurrent reader sees either nothing or the
///   complete verified entry, never a partial write;
/// - `put` is idempotent: a second write of the same `(id, data)` leaves the
///   store in the same observable state.
#[async_trait::async_trait]
pub trait ChunkStore: Send + Sync {
    /// Store an entry under its identifier. Verifies before writing.
    async fn put(&self, id: ContentId, data: Bytes) -> Result<(), StoreError>;

    /// Retrieve an entry by identifier. Returns `None` if not present.
    async fn try_get(&self, id: ContentId) -> Result<Option<Bytes>, StoreError>;

    /// Retrieve an entry, failing with [`StoreError::NotFound`] if absent.
    async fn get(&self, id: ContentId) -> Result<Bytes, StoreError> {
        self.try_get(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Check whether an entry exists. A miss is not an error.
    async fn contains(&self, id: ContentId) -> Result<bool, StoreError>;

    /// Delete an entry. Fails with [`StoreError::NotFound`] if absent.
    async fn delete(&self, id: ContentId) -> Result<(), StoreError>;

    /// List all stored identifiers.
    async fn list(&self) -> Result<Vec<ContentId>, StoreError>;

    /// Audit an entry: re-hash the stored bytes and compare to the key.
    async fn verify(&self, id: ContentId) -> Result<bool, StoreError>;
}
