//! Error types for content-addressed storage operations.

use brook_types::ContentId;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested entry was not found.
    #[error("entry not found: {0}")]
    NotFound(ContentId),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The data offered for a write does not hash to the given identifier.
    ///
    /// The write is rejected; the store never holds an entry whose key does
    /// not match the hash of its value.
    #[error("refusing write: data does not hash to identifier {id}")]
    IntegrityMismatch {
        /// The identifier the caller tried to store under.
        id: ContentId,
    },

    /// An entry on disk no longer hashes to its identifier.
    ///
    /// The entry is treated as missing rather than returned to the caller,
    /// so the read path can re-fetch it from a provider.
    #[error("entry corruption detected on read: {id}")]
    Corrupt {
        /// The identifier whose stored bytes are corrupt.
        id: ContentId,
    },
}
