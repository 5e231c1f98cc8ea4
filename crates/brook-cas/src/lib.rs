//! Content addressing: chunking, Merkle verification, and manifests.
//!
//! This crate provides:
//! - [`Chunker`] — splits data into fixed-size chunks at positional
//!   boundaries, each identified by its content hash.
//! - [`merkle_root`] / [`MerkleTree`] — binary hash tree over chunk hashes
//!   with duplicate-last-node padding, supporting both full-recompute and
//!   authentication-path verification of individual chunks.
//! - [`build_manifest`] and friends — canonical, deterministic manifest
//!   construction, serialization, and verification.

mod chunker;
mod error;
mod manifest;
mod merkle;

pub use chunker::{Chunk, Chunker};
pub use error::CasError;
pub use manifest::{
    MANIFEST_VERSION, ManifestOptions, build_manifest, build_manifest_at, compute_identifier,
    deserialize_manifest, missing_chunks, serialize_manifest, verify_manifest,
};
pub use merkle::{MerkleProof, MerkleTree, merkle_root, verify_leaf};
