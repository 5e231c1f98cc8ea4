//! Fixed-size chunker for splitting objects into content-addressed chunks.

use brook_types::{Codec, ContentId, HASH_LEN, HashAlgorithm};
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::CasError;

/// A single chunk of data with its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position within the object.
    pub index: u32,
    /// Byte offset within the object.
    pub offset: u64,
    /// The raw chunk data.
    pub data: Bytes,
    /// Content hash of exactly `data`.
    pub hash: [u8; HASH_LEN],
}

impl Chunk {
    /// The content identifier under which this chunk is stored.
    pub fn id(&self) -> ContentId {
        ContentId::new(Codec::Raw, self.hash)
    }
}

/// Fixed-size chunker.
///
/// Chunk boundaries are fixed by absolute byte offset: chunk `i` always
/// covers `[i * chunk_size, min((i + 1) * chunk_size, total))`. Resuming a
/// partially-received transfer therefore reproduces the exact boundaries of
/// a from-scratch split. The last chunk may be smaller than `chunk_size`;
/// empty input produces zero chunks, never a zero-length trailing chunk.
pub struct Chunker {
    chunk_size: u32,
    algo: HashAlgorithm,
}

impl Chunker {
    /// Create a chunker with the given chunk size and hash algorithm.
    pub fn new(chunk_size: u32, algo: HashAlgorithm) -> Self {
        Self { chunk_size, algo }
    }

    /// The configured chunk size in bytes.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of chunks an object of `total_size` bytes splits into.
    pub fn chunk_count(&self, total_size: u64) -> u32 {
        total_size.div_ceil(self.chunk_size as u64) as u32
    }

    /// The `(offset, size)` of chunk `index` within an object of
    /// `total_size` bytes, or `None` if the index is out of range.
    pub fn chunk_range(&self, index: u32, total_size: u64) -> Option<(u64, u32)> {
        if index >= self.chunk_count(total_size) {
            return None;
        }
        let offset = index as u64 * self.chunk_size as u64;
        let size = (total_size - offset).min(self.chunk_size as u64) as u32;
        Some((offset, size))
    }

    /// Split data into fixed-size chunks, hashing each one.
    pub fn split(&self, data: &[u8]) -> Vec<Chunk> {
        if data.is_empty() {
            return Vec::new();
        }

        let chunk_size = self.chunk_size as usize;
        let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size));
        let mut offset = 0u64;

        for (index, slice) in data.chunks(chunk_size).enumerate() {
            chunks.push(Chunk {
                index: index as u32,
                offset,
                data: Bytes::copy_from_slice(slice),
                hash: self.algo.digest(slice),
            });
            offset += slice.len() as u64;
        }

        chunks
    }

    /// Split data from an async reader into fixed-size chunks.
    ///
    /// Produces the same boundaries and hashes as [`Chunker::split`] over
    /// the fully-read byte sequence.
    pub async fn split_stream(
        &self,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<Vec<Chunk>, CasError> {
        use tokio::io::AsyncReadExt;

        let chunk_size = self.chunk_size as usize;
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut index = 0u32;

        loop {
            let mut buf = vec![0u8; chunk_size];
            let mut filled = 0;

            // Fill exactly chunk_size bytes, or stop at EOF.
            while filled < chunk_size {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }

            if filled == 0 {
                break;
            }

            buf.truncate(filled);
            let hash = self.algo.digest(&buf);
            chunks.push(Chunk {
                index,
                offset,
                data: Bytes::from(buf),
                hash,
            });
            offset += filled as u64;
            index += 1;
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: u32) -> Chunker {
        Chunker::new(size, HashAlgorithm::Blake3)
    }

    #[test]
    fn test_split_empty_data() {
        assert!(chunker(1024).split(b"").is_empty());
    }

    #[test]
    fn test_split_exactly_chunk_size() {
        let data = vec![0xABu8; 16];
        let chunks = chunker(16).split(&data);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, data);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_split_chunk_size_plus_one() {
        let data = vec![0xCDu8; 17];
        let chunks = chunker(16).split(&data);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].data.len(), 16);
        assert_eq!(chunks[1].data.len(), 1);
        assert_eq!(chunks[1].offset, 16);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_split_three_and_half_chunks() {
        let data = vec![0xFFu8; 350];
        let chunks = chunker(100).split(&data);
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u32);
            assert_eq!(chunk.offset, i as u64 * 100);
        }
        assert_eq!(chunks[3].data.len(), 50);
    }

    #[test]
    fn test_chunk_hash_matches_algorithm() {
        let data = b"deterministic chunk content";
        let chunks = chunker(1024).split(data);
        assert_eq!(chunks[0].hash, HashAlgorithm::Blake3.digest(data));
        assert!(chunks[0].id().matches(HashAlgorithm::Blake3, data));
    }

    #[test]
    fn test_identical_chunks_share_identifier() {
        // "AAAAAAAA" splits into two identical chunks with one identifier.
        let data = vec![b'A'; 8];
        let chunks = chunker(4).split(&data);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id(), chunks[1].id());
    }

    #[test]
    fn test_chunk_count_and_range() {
        let c = chunker(100);
        assert_eq!(c.chunk_count(0), 0);
        assert_eq!(c.chunk_count(1), 1);
        assert_eq!(c.chunk_count(100), 1);
        assert_eq!(c.chunk_count(101), 2);
        assert_eq!(c.chunk_count(350), 4);

        assert_eq!(c.chunk_range(0, 350), Some((0, 100)));
        assert_eq!(c.chunk_range(3, 350), Some((300, 50)));
        assert_eq!(c.chunk_range(4, 350), None);
        assert_eq!(c.chunk_range(0, 0), None);
    }

    #[tokio::test]
    async fn test_split_stream_matches_sync() {
        let c = chunker(10);
        let data = b"hello world, this is streaming chunker test data!";

        let sync_chunks = c.split(data);
        let stream_chunks = c.split_stream(std::io::Cursor::new(data)).await.unwrap();

        assert_eq!(sync_chunks, stream_chunks);
    }

    #[tokio::test]
    async fn test_split_stream_empty() {
        let chunks = chunker(1024)
            .split_stream(std::io::Cursor::new(b""))
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }
}
