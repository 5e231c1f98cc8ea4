//! File-based content-addressed storage backend.
//!
//! Stores one file per entry with a 2-level fan-out directory structure
//! derived from the content hash: `{base_dir}/{hash_hex[0..2]}/{hash_hex[2..4]}/{id}`.
//! The fan-out bounds per-directory entry counts for large stores.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use brook_types::ContentId;
use bytes::Bytes;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::traits::{ChunkStore, id_matches_data};

/// File-based store with 2-level fan-out directory layout.
///
/// Writes are atomic: data is verified against its identifier, written to a
/// uniquely-named temporary file in the destination directory, then renamed
/// into place. Concurrent `put` calls for the same identifier are idempotent:
/// each writer renames an identical verified file over the same destination,
/// and readers only ever observe complete entries.
pub struct FileStore {
    base_dir: PathBuf,
    /// Distinguishes temp files of concurrent writers in the same process.
    tmp_seq: AtomicU64,
}

impl FileStore {
    /// Create a new file store rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Compute the full file path for an identifier.
    fn entry_path(&self, id: &ContentId) -> PathBuf {
        let encoded = id.encode();
        // Shard by the hash portion; the version/codec prefix is constant.
        let hash_hex = &encoded[4..];
        self.base_dir
            .join(&hash_hex[0..2])
            .join(&hash_hex[2..4])
            .join(&encoded)
    }

    fn tmp_path(&self, path: &Path) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("tmp-{}-{seq}", std::process::id()))
    }
}

#[async_trait::async_trait]
impl ChunkStore for FileStore {
    async fn put(&self, id: ContentId, data: Bytes) -> Result<(), StoreError> {
        // Verify before every write; the store never holds a mismatched entry.
        if !id_matches_data(&id, &data) {
            return Err(StoreError::IntegrityMismatch { id });
        }

        let path = self.entry_path(&id);
        if tokio::fs::try_exists(&path).await? {
            debug!(%id, "entry already present, skipping write");
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write: unique temp file in the same directory, then rename.
        // A reader never observes a half-written entry.
        let tmp_path = self.tmp_path(&path);
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(%id, path = %path.display(), size = data.len(), "stored entry to file");
        Ok(())
    }

    async fn try_get(&self, id: ContentId) -> Result<Option<Bytes>, StoreError> {
        let path = self.entry_path(&id);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                // Verify-on-read: corrupt entries are an error, not data,
                // so the caller re-fetches from a provider instead.
                if !id_matches_data(&id, &data) {
                    error!(%id, "entry corruption detected on read");
                    return Err(StoreError::Corrupt { id });
                }
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn contains(&self, id: ContentId) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.entry_path(&id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete(&self, id: ContentId) -> Result<(), StoreError> {
        let path = self.entry_path(&id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(%id, "deleted entry file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<ContentId>, StoreError> {
        let mut ids = Vec::new();

        // Walk the 2-level fan-out: base/XX/YY/<encoded id>.
        let mut level0 = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(d0) = level0.next_entry().await? {
            if !d0.file_type().await?.is_dir() {
                continue;
            }
            let mut level1 = tokio::fs::read_dir(d0.path()).await?;
            while let Some(d1) = level1.next_entry().await? {
                if !d1.file_type().await?.is_dir() {
                    continue;
                }
                let mut files = tokio::fs::read_dir(d1.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    if !entry.file_type().await?.is_file() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str()
                        && let Ok(id) = ContentId::decode(name)
                    {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn verify(&self, id: ContentId) -> Result<bool, StoreError> {
        let path = self.entry_path(&id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(id_matches_data(&id, &data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
