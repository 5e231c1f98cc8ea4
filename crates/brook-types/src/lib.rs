//! Shared types and identifiers for Brook.
//!
//! This crate defines the core types used across the Brook workspace:
//! the content identifier ([`ContentId`]) and its string codec, the hash
//! algorithm selection ([`HashAlgorithm`]), manifest data structures
//! ([`Manifest`], [`ChunkRef`]), provider identity ([`ProviderId`]), and
//! exchange configuration ([`ExchangeConfig`]).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier format version produced by this crate.
pub const CURRENT_VERSION: u8 = 1;

/// Length of a content hash in bytes. Both supported algorithms are 256-bit.
pub const HASH_LEN: usize = 32;

/// Length of the fixed-width hex string form of a [`ContentId`]:
/// 2 chars version + 2 chars codec + 64 chars hash.
pub const ENCODED_LEN: usize = 68;

// ---------------------------------------------------------------------------
// Hash algorithm
// ---------------------------------------------------------------------------

/// Content hash algorithm. Recorded in every manifest so that chunks and
/// roots are always recomputed with the algorithm the producer used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// BLAKE3, the default. Fast and tree-friendly.
    #[default]
    Blake3,
    /// SHA-256, for interoperating with producers that require it.
    Sha256,
}

impl HashAlgorithm {
    /// Hash `data`, returning the 32-byte digest.
    pub fn digest(&self, data: &[u8]) -> [u8; HASH_LEN] {
        match self {
            Self::Blake3 => blake3::hash(data).into(),
            Self::Sha256 => {
                use sha2::{Digest, Sha256};
                Sha256::digest(data).into()
            }
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blake3 => write!(f, "blake3"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

// ---------------------------------------------------------------------------
// Content identifier
// ---------------------------------------------------------------------------

/// What kind of content an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Codec {
    /// Raw bytes: a chunk of object data.
    Raw,
    /// A serialized [`Manifest`].
    Manifest,
}

impl Codec {
    /// Stable one-byte tag used in the string form.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Raw => 0x00,
            Self::Manifest => 0x01,
        }
    }

    /// Reverse of [`Codec::tag`]. Unknown tags are rejected.
    pub fn from_tag(tag: u8) -> Result<Self, IdError> {
        match tag {
            0x00 => Ok(Self::Raw),
            0x01 => Ok(Self::Manifest),
            other => Err(IdError::UnknownCodec(other)),
        }
    }
}

/// Content-addressed identifier: format version, codec, and content hash.
///
/// An identifier is a pure function of content bytes (plus codec and hash
/// algorithm) and never encodes location. Identical content always yields
/// the identical identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ContentId {
    version: u8,
    codec: Codec,
    hash: [u8; HASH_LEN],
}

impl ContentId {
    /// Create an identifier from an already-computed hash.
    pub fn new(codec: Codec, hash: [u8; HASH_LEN]) -> Self {
        Self {
            version: CURRENT_VERSION,
            codec,
            hash,
        }
    }

    /// Create an identifier by hashing `data` with `algo`.
    pub fn for_bytes(codec: Codec, algo: HashAlgorithm, data: &[u8]) -> Self {
        Self::new(codec, algo.digest(data))
    }

    /// Identifier format version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The codec of the named content.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The raw 32-byte content hash.
    pub fn hash(&self) -> &[u8; HASH_LEN] {
        &self.hash
    }

    /// Check that `data` hashes to this identifier under `algo`.
    pub fn matches(&self, algo: HashAlgorithm, data: &[u8]) -> bool {
        algo.digest(data) == self.hash
    }

    /// Encode to the compact fixed-width string form:
    /// `<version:2 hex><codec tag:2 hex><hash:64 hex>`.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(ENCODED_LEN);
        push_hex_byte(&mut out, self.version);
        push_hex_byte(&mut out, self.codec.tag());
        for byte in &self.hash {
            push_hex_byte(&mut out, *byte);
        }
        out
    }

    /// Decode the string form produced by [`ContentId::encode`].
    ///
    /// Rejects anything that is not exactly one well-formed identifier:
    /// wrong length (no silent truncation of trailing characters), non-hex
    /// characters, unknown versions, and unknown codec tags.
    pub fn decode(s: &str) -> Result<Self, IdError> {
        if s.len() != ENCODED_LEN {
            return Err(IdError::Length(s.len()));
        }
        let raw = s.as_bytes();
        let version = hex_byte(raw[0], raw[1])?;
        if version != CURRENT_VERSION {
            return Err(IdError::UnknownVersion(version));
        }
        let codec = Codec::from_tag(hex_byte(raw[2], raw[3])?)?;
        let mut hash = [0u8; HASH_LEN];
        for (i, byte) in hash.iter_mut().enumerate() {
            *byte = hex_byte(raw[4 + i * 2], raw[4 + i * 2 + 1])?;
        }
        Ok(Self {
            version,
            codec,
            hash,
        })
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self)
    }
}

impl FromStr for ContentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Errors from decoding a [`ContentId`] string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The string is not exactly [`ENCODED_LEN`] characters.
    #[error("malformed identifier: length {0}, expected {ENCODED_LEN}")]
    Length(usize),

    /// A character outside `[0-9a-f]` was encountered.
    #[error("malformed identifier: non-hex character")]
    NonHex,

    /// The version field names a format this crate does not produce.
    #[error("malformed identifier: unknown version {0}")]
    UnknownVersion(u8),

    /// The codec tag is not a known [`Codec`].
    #[error("malformed identifier: unknown codec tag {0:#04x}")]
    UnknownCodec(u8),
}

fn push_hex_byte(out: &mut String, byte: u8) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    out.push(HEX[(byte >> 4) as usize] as char);
    out.push(HEX[(byte & 0x0f) as usize] as char);
}

fn hex_byte(hi: u8, lo: u8) -> Result<u8, IdError> {
    Ok((hex_nibble(hi)? << 4) | hex_nibble(lo)?)
}

fn hex_nibble(c: u8) -> Result<u8, IdError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(IdError::NonHex),
    }
}

// ---------------------------------------------------------------------------
// Provider identity
// ---------------------------------------------------------------------------

/// Identifier for a provider node, derived from its transport endpoint key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ProviderId([u8; 32]);

impl ProviderId {
    /// Create a provider ID by hashing arbitrary data with BLAKE3.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for ProviderId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderId({})", self)
    }
}

// ---------------------------------------------------------------------------
// Manifest data structures
// ---------------------------------------------------------------------------

/// Descriptor for a single chunk within a manifest. Carries no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// 0-based position within the object.
    pub index: u32,
    /// Byte offset of this chunk within the object.
    pub offset: u64,
    /// Size of this chunk in bytes. Only the final chunk may be short.
    pub size: u32,
    /// Content hash of exactly this chunk's bytes.
    pub hash: [u8; HASH_LEN],
}

impl ChunkRef {
    /// The content identifier under which this chunk is stored and requested.
    pub fn id(&self) -> ContentId {
        ContentId::new(Codec::Raw, self.hash)
    }
}

/// Description of a stored object: its chunk layout and Merkle root.
///
/// A manifest is itself content-addressed: `identifier` is the hash of the
/// manifest's canonical serialized content, with codec [`Codec::Manifest`].
/// Manifests are immutable; the same bytes chunked with the same options
/// always produce a byte-identical manifest and thus the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Identifier of this manifest (hash of its canonical serialized content).
    pub identifier: ContentId,
    /// Human-readable name of the object (not part of addressing semantics,
    /// but hashed like every other field).
    pub name: String,
    /// Total size of the object in bytes.
    pub total_size: u64,
    /// Configured chunk size (last chunk may be smaller).
    pub chunk_size: u32,
    /// Number of chunks. Always equals `chunks.len()`.
    pub chunk_count: u32,
    /// Hash algorithm used for chunk hashes, the root, and the identifier.
    pub hash_algorithm: HashAlgorithm,
    /// Merkle root over the ordered chunk hashes.
    pub root_hash: [u8; HASH_LEN],
    /// Ordered chunk descriptors.
    pub chunks: Vec<ChunkRef>,
    /// Unix timestamp (seconds) when the object was published.
    pub created_at: u64,
}

impl Manifest {
    /// The identifier of the chunk at `index`, if in range.
    pub fn chunk_id(&self, index: u32) -> Option<ContentId> {
        self.chunks.get(index as usize).map(ChunkRef::id)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the exchange engine, passed explicitly into
/// constructors. No environment-variable driven defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Chunk size in bytes used when publishing.
    pub chunk_size: u32,
    /// Hash algorithm used when publishing.
    pub hash_algorithm: HashAlgorithm,
    /// Maximum number of chunk fetches in flight at once.
    pub parallel_providers_max: usize,
    /// Bounded wait for a single outstanding want.
    pub want_timeout: Duration,
    /// How many times a single chunk is retried (across providers) before
    /// the session gives up on it.
    pub max_retries_per_chunk: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 262_144, // 256 KB
            hash_algorithm: HashAlgorithm::Blake3,
            parallel_providers_max: 3,
            want_timeout: Duration::from_secs(10),
            max_retries_per_chunk: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        for algo in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            assert_eq!(algo.digest(b"hello"), algo.digest(b"hello"));
            assert_ne!(algo.digest(b"hello"), algo.digest(b"world"));
        }
    }

    #[test]
    fn test_algorithms_disagree() {
        // Same input, different algorithm, different digest.
        assert_ne!(
            HashAlgorithm::Blake3.digest(b"content"),
            HashAlgorithm::Sha256.digest(b"content")
        );
    }

    #[test]
    fn test_id_for_bytes_deterministic() {
        let a = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"data");
        let b = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"data");
        assert_eq!(a, b, "same content must produce same identifier");
    }

    #[test]
    fn test_id_codec_changes_identifier() {
        let raw = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"data");
        let man = ContentId::for_bytes(Codec::Manifest, HashAlgorithm::Blake3, b"data");
        assert_ne!(raw, man);
        assert_eq!(raw.hash(), man.hash());
    }

    #[test]
    fn test_encode_fixed_width() {
        let id = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"x");
        let s = id.encode();
        assert_eq!(s.len(), ENCODED_LEN);
        assert!(s.starts_with("0100"), "version 1, codec raw: {s}");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for codec in [Codec::Raw, Codec::Manifest] {
            for algo in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
                let id = ContentId::for_bytes(codec, algo, b"roundtrip content");
                let decoded = ContentId::decode(&id.encode()).unwrap();
                assert_eq!(id, decoded);
                assert_eq!(decoded.version(), CURRENT_VERSION);
                assert_eq!(decoded.codec(), codec);
            }
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let id = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"x");
        let s = id.encode();

        // Trailing character.
        let long = format!("{s}a");
        assert_eq!(ContentId::decode(&long), Err(IdError::Length(69)));

        // Missing character.
        assert_eq!(ContentId::decode(&s[..67]), Err(IdError::Length(67)));

        assert_eq!(ContentId::decode(""), Err(IdError::Length(0)));
    }

    #[test]
    fn test_decode_rejects_non_hex() {
        let mut s = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"x").encode();
        s.replace_range(10..11, "g");
        assert_eq!(ContentId::decode(&s), Err(IdError::NonHex));

        // Uppercase hex is not the canonical form either.
        let mut s = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"x").encode();
        s.replace_range(10..11, "A");
        assert_eq!(ContentId::decode(&s), Err(IdError::NonHex));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut s = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"x").encode();
        s.replace_range(0..2, "02");
        assert_eq!(ContentId::decode(&s), Err(IdError::UnknownVersion(2)));
    }

    #[test]
    fn test_decode_rejects_unknown_codec() {
        let mut s = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"x").encode();
        s.replace_range(2..4, "7f");
        assert_eq!(ContentId::decode(&s), Err(IdError::UnknownCodec(0x7f)));
    }

    #[test]
    fn test_from_str_matches_decode() {
        let id = ContentId::for_bytes(Codec::Manifest, HashAlgorithm::Sha256, b"parse me");
        let parsed: ContentId = id.encode().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_matches() {
        let id = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"payload");
        assert!(id.matches(HashAlgorithm::Blake3, b"payload"));
        assert!(!id.matches(HashAlgorithm::Blake3, b"tampered"));
        assert!(!id.matches(HashAlgorithm::Sha256, b"payload"));
    }

    #[test]
    fn test_display_is_encode() {
        let id = ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, b"display");
        assert_eq!(id.to_string(), id.encode());
    }

    #[test]
    fn test_chunk_ref_id_uses_raw_codec() {
        let hash = HashAlgorithm::Blake3.digest(b"chunk bytes");
        let chunk = ChunkRef {
            index: 0,
            offset: 0,
            size: 11,
            hash,
        };
        assert_eq!(chunk.id().codec(), Codec::Raw);
        assert_eq!(chunk.id().hash(), &hash);
    }

    #[test]
    fn test_provider_id_deterministic() {
        let a = ProviderId::from_data(b"endpoint key");
        let b = ProviderId::from_data(b"endpoint key");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), 32);
    }

    #[test]
    fn test_exchange_config_defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.chunk_size, 262_144);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
        assert_eq!(config.parallel_providers_max, 3);
        assert_eq!(config.want_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries_per_chunk, 3);
    }

    // --- Postcard round-trip tests ---

    #[test]
    fn test_content_id_roundtrip_postcard() {
        let id = ContentId::for_bytes(Codec::Manifest, HashAlgorithm::Blake3, b"wire");
        let encoded = postcard::to_allocvec(&id).unwrap();
        let decoded: ContentId = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn test_manifest_roundtrip_postcard() {
        let algo = HashAlgorithm::Blake3;
        let chunks = vec![
            ChunkRef {
                index: 0,
                offset: 0,
                size: 1024,
                hash: algo.digest(b"chunk 0"),
            },
            ChunkRef {
                index: 1,
                offset: 1024,
                size: 500,
                hash: algo.digest(b"chunk 1"),
            },
        ];
        let manifest = Manifest {
            identifier: ContentId::for_bytes(Codec::Manifest, algo, b"manifest body"),
            name: "release.tar".to_string(),
            total_size: 1524,
            chunk_size: 1024,
            chunk_count: 2,
            hash_algorithm: algo,
            root_hash: algo.digest(b"root"),
            chunks,
            created_at: 1_700_000_000,
        };

        let encoded = postcard::to_allocvec(&manifest).unwrap();
        let decoded: Manifest = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(manifest, decoded);
    }

    #[test]
    fn test_manifest_chunk_id_lookup() {
        let algo = HashAlgorithm::Blake3;
        let manifest = Manifest {
            identifier: ContentId::for_bytes(Codec::Manifest, algo, b"m"),
            name: String::new(),
            total_size: 4,
            chunk_size: 4,
            chunk_count: 1,
            hash_algorithm: algo,
            root_hash: algo.digest(b"abcd"),
            chunks: vec![ChunkRef {
                index: 0,
                offset: 0,
                size: 4,
                hash: algo.digest(b"abcd"),
            }],
            created_at: 0,
        };
        assert!(manifest.chunk_id(0).is_some());
        assert!(manifest.chunk_id(1).is_none());
    }
}
