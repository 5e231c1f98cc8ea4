//! Error types for the exchange engine.

use brook_types::ContentId;

/// Why a single chunk could not be retrieved, kept per index so a caller
/// can diagnose and selectively retry.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    /// Index of the failed chunk.
    pub index: u32,
    /// Identifier of the failed chunk.
    pub id: ContentId,
    /// Total want attempts made across providers.
    pub attempts: u32,
    /// The last error observed for this chunk.
    pub last_error: String,
}

/// Errors that can occur during a fetch or publish.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Discovery produced no candidate providers for the identifier.
    #[error("no providers found for {0}")]
    NoProviders(ContentId),

    /// The fetch target does not name a manifest.
    #[error("target identifier {0} does not name a manifest")]
    NotAManifest(ContentId),

    /// No provider returned a usable manifest for the requested identifier.
    #[error("manifest {requested} could not be resolved from any provider")]
    ManifestUnavailable {
        /// The identifier the fetch was started with.
        requested: ContentId,
    },

    /// A returned manifest's computed identifier does not equal the
    /// requested identifier. Never silently accepted.
    #[error("manifest identity mismatch: requested {requested}, computed {computed}")]
    ManifestIdentityMismatch {
        /// The identifier the fetch was started with.
        requested: ContentId,
        /// The identifier computed from the returned manifest bytes.
        computed: ContentId,
    },

    /// Every retry for one or more required chunks was exhausted across all
    /// known providers.
    #[error("fetch exhausted providers for {} chunk(s)", failures.len())]
    Exhausted {
        /// Per-index failure detail, ordered by chunk index.
        failures: Vec<ChunkFailure>,
    },

    /// The session was cancelled by external request.
    #[error("session cancelled")]
    Cancelled,

    /// A content-addressing operation failed.
    #[error(transparent)]
    Cas(#[from] brook_cas::CasError),

    /// A local store operation failed.
    #[error(transparent)]
    Store(#[from] brook_store::StoreError),
}
