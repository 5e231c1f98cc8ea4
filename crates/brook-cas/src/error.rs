//! Error types for content addressing operations.

/// Errors that can occur during chunking, manifest, or verification work.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred during streaming.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest identifier has an unsupported format version.
    #[error("unsupported identifier version {found}, this node supports version {supported}")]
    UnsupportedVersion {
        /// Version found in the manifest identifier.
        found: u8,
        /// Version this node supports.
        supported: u8,
    },

    /// A chunk's bytes do not hash to the value recorded in the manifest.
    #[error("chunk {chunk_index} failed hash verification")]
    IntegrityMismatch {
        /// Index of the first failing chunk.
        chunk_index: u32,
    },

    /// The Merkle root recomputed from the chunk hashes does not match the
    /// manifest's recorded root.
    #[error("merkle root does not match the manifest root hash")]
    RootMismatch,

    /// The manifest violates a structural invariant.
    #[error("invalid manifest: {0}")]
    InvalidManifest(&'static str),

    /// A local store operation failed while computing chunk presence.
    #[error("store error: {0}")]
    Store(#[from] brook_store::StoreError),
}
