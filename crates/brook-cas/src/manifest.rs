//! Manifest building, canonical serialization, and verification.
//!
//! A [`Manifest`] describes how an object was chunked: total size, ordered
//! chunk descriptors, and the Merkle root over the chunk hashes. Manifests
//! are content-addressed: the canonical serialized form is the postcard
//! encoding of [`ManifestEnvelope`] (every field except the identifier, in
//! declaration order), and the identifier is the hash of exactly those
//! bytes with codec `manifest`. The identifier is therefore always derived,
//! never trusted from the wire — a manifest cannot lie about its own hash —
//! and a stored manifest satisfies the store's key-matches-value invariant
//! like any chunk.
//!
//! Postcard is length-prefixed and float-free, which keeps the hashed
//! region stable across producers: identical bytes and options yield a
//! byte-identical manifest and an identical identifier.

use std::collections::BTreeSet;

use brook_store::ChunkStore;
use brook_types::{ChunkRef, Codec, ContentId, HASH_LEN, HashAlgorithm, Manifest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunker::Chunker;
use crate::error::CasError;
use crate::merkle::merkle_root;

/// Serialized manifest format version. Part of the hashed region, so a
/// format bump mints new identifiers for old content.
pub const MANIFEST_VERSION: u8 = 1;

/// Options controlling manifest creation.
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    /// Human-readable object name recorded in the manifest.
    pub name: String,
    /// Chunk size in bytes.
    pub chunk_size: u32,
    /// Hash algorithm for chunks, root, and identifier.
    pub hash_algorithm: HashAlgorithm,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            chunk_size: 262_144,
            hash_algorithm: HashAlgorithm::Blake3,
        }
    }
}

/// The canonical serialized form of a manifest: every field except the
/// (derived) identifier, in declaration order.
#[derive(Serialize, Deserialize)]
struct ManifestEnvelope {
    version: u8,
    name: String,
    total_size: u64,
    chunk_size: u32,
    chunk_count: u32,
    hash_algorithm: HashAlgorithm,
    root_hash: [u8; HASH_LEN],
    chunks: Vec<ChunkRef>,
    created_at: u64,
}

fn envelope_of(manifest: &Manifest) -> ManifestEnvelope {
    ManifestEnvelope {
        version: MANIFEST_VERSION,
        name: manifest.name.clone(),
        total_size: manifest.total_size,
        chunk_size: manifest.chunk_size,
        chunk_count: manifest.chunk_count,
        hash_algorithm: manifest.hash_algorithm,
        root_hash: manifest.root_hash,
        chunks: manifest.chunks.clone(),
        created_at: manifest.created_at,
    }
}

/// Build a manifest from source bytes, stamped with the current time.
pub fn build_manifest(data: &[u8], opts: &ManifestOptions) -> Result<Manifest, CasError> {
    build_manifest_at(data, opts, now_secs())
}

/// Build a manifest with an explicit timestamp.
///
/// Fully deterministic: identical bytes and options produce a byte-identical
/// serialized manifest and therefore an identical identifier.
pub fn build_manifest_at(
    data: &[u8],
    opts: &ManifestOptions,
    created_at: u64,
) -> Result<Manifest, CasError> {
    if opts.chunk_size == 0 {
        return Err(CasError::InvalidManifest("chunk size must be non-zero"));
    }

    let chunker = Chunker::new(opts.chunk_size, opts.hash_algorithm);
    let chunks: Vec<ChunkRef> = chunker
        .split(data)
        .iter()
        .map(|c| ChunkRef {
            index: c.index,
            offset: c.offset,
            size: c.data.len() as u32,
            hash: c.hash,
        })
        .collect();

    let leaf_hashes: Vec<[u8; HASH_LEN]> = chunks.iter().map(|c| c.hash).collect();
    let root_hash = merkle_root(opts.hash_algorithm, &leaf_hashes);

    let mut manifest = Manifest {
        // Placeholder until the canonical bytes are hashed below.
        identifier: ContentId::new(Codec::Manifest, [0u8; HASH_LEN]),
        name: opts.name.clone(),
        total_size: data.len() as u64,
        chunk_size: opts.chunk_size,
        chunk_count: chunks.len() as u32,
        hash_algorithm: opts.hash_algorithm,
        root_hash,
        chunks,
        created_at,
    };
    manifest.identifier = compute_identifier(&manifest)?;

    debug!(
        identifier = %manifest.identifier,
        total_size = manifest.total_size,
        chunks = manifest.chunk_count,
        "built manifest"
    );
    Ok(manifest)
}

/// Serialize a manifest to its canonical postcard form.
///
/// These are the bytes the identifier hashes over, the bytes that travel
/// in a `ManifestRes`, and the bytes stored under the manifest identifier.
pub fn serialize_manifest(manifest: &Manifest) -> Result<Vec<u8>, CasError> {
    postcard::to_allocvec(&envelope_of(manifest)).map_err(|e| CasError::Serialization(e.to_string()))
}

/// Recompute a manifest's identifier from its canonical bytes.
pub fn compute_identifier(manifest: &Manifest) -> Result<ContentId, CasError> {
    let bytes = serialize_manifest(manifest)?;
    Ok(ContentId::for_bytes(
        Codec::Manifest,
        manifest.hash_algorithm,
        &bytes,
    ))
}

/// Deserialize a manifest from its canonical bytes.
///
/// The identifier is derived by hashing the input, never read from it.
/// Rejects unknown versions, trailing bytes, chunk layouts that violate the
/// structural invariants, and a root that does not match the chunk hashes.
pub fn deserialize_manifest(bytes: &[u8]) -> Result<Manifest, CasError> {
    let (envelope, rest): (ManifestEnvelope, &[u8]) = postcard::take_from_bytes(bytes)
        .map_err(|e| CasError::Serialization(e.to_string()))?;
    if !rest.is_empty() {
        return Err(CasError::Serialization(format!(
            "{} trailing bytes after manifest",
            rest.len()
        )));
    }
    if envelope.version != MANIFEST_VERSION {
        return Err(CasError::UnsupportedVersion {
            found: envelope.version,
            supported: MANIFEST_VERSION,
        });
    }

    let manifest = Manifest {
        identifier: ContentId::for_bytes(Codec::Manifest, envelope.hash_algorithm, bytes),
        name: envelope.name,
        total_size: envelope.total_size,
        chunk_size: envelope.chunk_size,
        chunk_count: envelope.chunk_count,
        hash_algorithm: envelope.hash_algorithm,
        root_hash: envelope.root_hash,
        chunks: envelope.chunks,
        created_at: envelope.created_at,
    };

    check_structure(&manifest)?;

    // The recorded root must be the Merkle root of the chunk hashes.
    let leaf_hashes: Vec<[u8; HASH_LEN]> = manifest.chunks.iter().map(|c| c.hash).collect();
    if merkle_root(manifest.hash_algorithm, &leaf_hashes) != manifest.root_hash {
        return Err(CasError::RootMismatch);
    }

    Ok(manifest)
}

/// Validate the chunk-layout invariants.
fn check_structure(manifest: &Manifest) -> Result<(), CasError> {
    if manifest.chunk_count as usize != manifest.chunks.len() {
        return Err(CasError::InvalidManifest(
            "chunk_count does not equal the number of chunks",
        ));
    }
    if manifest.chunk_count > 0 && manifest.chunk_size == 0 {
        return Err(CasError::InvalidManifest("chunk size must be non-zero"));
    }

    let mut expected_offset = 0u64;
    for (i, chunk) in manifest.chunks.iter().enumerate() {
        if chunk.index as usize != i {
            return Err(CasError::InvalidManifest("chunk indices must be dense"));
        }
        if chunk.offset != expected_offset {
            return Err(CasError::InvalidManifest("chunk offsets must be contiguous"));
        }
        if chunk.size == 0 {
            return Err(CasError::InvalidManifest("zero-length chunk"));
        }
        let last = i + 1 == manifest.chunks.len();
        if !last && chunk.size != manifest.chunk_size {
            return Err(CasError::InvalidManifest(
                "only the final chunk may be short",
            ));
        }
        if chunk.size > manifest.chunk_size {
            return Err(CasError::InvalidManifest("chunk larger than chunk_size"));
        }
        expected_offset += chunk.size as u64;
    }

    if expected_offset != manifest.total_size {
        return Err(CasError::InvalidManifest(
            "chunk sizes do not sum to total_size",
        ));
    }
    Ok(())
}

/// Verify object bytes against a manifest.
///
/// Recomputes every chunk hash over its byte range (reporting the first
/// failing index), then recomputes the Merkle root.
pub fn verify_manifest(manifest: &Manifest, data: &[u8]) -> Result<(), CasError> {
    check_structure(manifest)?;
    if data.len() as u64 != manifest.total_size {
        return Err(CasError::InvalidManifest(
            "data length does not equal total_size",
        ));
    }

    let algo = manifest.hash_algorithm;
    for chunk in &manifest.chunks {
        let start = chunk.offset as usize;
        let end = start + chunk.size as usize;
        let range = data
            .get(start..end)
            .ok_or(CasError::InvalidManifest("chunk range out of bounds"))?;
        if algo.digest(range) != chunk.hash {
            return Err(CasError::IntegrityMismatch {
                chunk_index: chunk.index,
            });
        }
    }

    let leaf_hashes: Vec<[u8; HASH_LEN]> = manifest.chunks.iter().map(|c| c.hash).collect();
    if merkle_root(algo, &leaf_hashes) != manifest.root_hash {
        return Err(CasError::RootMismatch);
    }

    Ok(())
}

/// Compute the set of chunk indices a local store does not yet hold.
pub async fn missing_chunks(
    manifest: &Manifest,
    store: &dyn ChunkStore,
) -> Result<BTreeSet<u32>, CasError> {
    let mut missing = BTreeSet::new();
    for chunk in &manifest.chunks {
        if !store.contains(chunk.id()).await? {
            missing.insert(chunk.index);
        }
    }
    Ok(missing)
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
