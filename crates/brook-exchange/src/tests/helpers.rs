//! Shared test utilities for exchange tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use brook_cas::{Chunker, build_manifest_at, serialize_manifest};
use brook_net::{NetError, Provider, ProviderDirectory, StaticDirectory};
use brook_store::{ChunkStore, MemoryStore};
use brook_types::{ContentId, ExchangeConfig, HashAlgorithm, Manifest, ProviderId};
use bytes::Bytes;

use crate::Exchange;

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Exchange config tuned for fast tests.
pub fn test_config(chunk_size: u32, want_timeout: Duration) -> ExchangeConfig {
    ExchangeConfig {
        chunk_size,
        want_timeout,
        ..ExchangeConfig::default()
    }
}

/// Build a manifest (fixed timestamp) and the chunk payloads for `data`.
pub fn manifest_for(name: &str, data: &[u8], chunk_size: u32) -> (Manifest, Vec<(ContentId, Bytes)>) {
    let opts = brook_cas::ManifestOptions {
        name: name.to_string(),
        chunk_size,
        hash_algorithm: HashAlgorithm::Blake3,
    };
    let manifest = build_manifest_at(data, &opts, 1_700_000_000).unwrap();
    let chunker = Chunker::new(chunk_size, HashAlgorithm::Blake3);
    let chunks = chunker
        .split(data)
        .into_iter()
        .map(|c| (c.id(), c.data))
        .collect();
    (manifest, chunks)
}

/// A scriptable in-process provider.
///
/// Serves whatever entries it was seeded with. `corrupt_blocks` makes every
/// block answer garbage; `unreachable` fails every request; `block_delay`
/// stalls block answers only (manifest and have queries stay fast so
/// sessions get past resolution).
pub struct MockProvider {
    id: ProviderId,
    entries: HashMap<ContentId, Bytes>,
    pub corrupt_blocks: bool,
    pub unreachable: bool,
    pub block_delay: Option<Duration>,
    pub wants: AtomicU32,
    pub manifest_reqs: AtomicU32,
    pub cancelled: Mutex<Vec<ContentId>>,
}

impl MockProvider {
    pub fn new(name: &[u8]) -> Self {
        Self {
            id: ProviderId::from_data(name),
            entries: HashMap::new(),
            corrupt_blocks: false,
            unreachable: false,
            block_delay: None,
            wants: AtomicU32::new(0),
            manifest_reqs: AtomicU32::new(0),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Seed the provider with the manifest and the chunks selected by
    /// `keep` (by chunk index).
    pub fn seeded(
        name: &[u8],
        manifest: &Manifest,
        chunks: &[(ContentId, Bytes)],
        keep: impl Fn(u32) -> bool,
    ) -> Self {
        let mut provider = Self::new(name);
        provider.entries.insert(
            manifest.identifier,
            Bytes::from(serialize_manifest(manifest).unwrap()),
        );
        for (index, (id, data)) in chunks.iter().enumerate() {
            if keep(index as u32) {
                provider.entries.insert(*id, data.clone());
            }
        }
        provider
    }

    /// Insert an arbitrary entry (e.g. a wrong manifest under a right key).
    pub fn insert(&mut self, id: ContentId, data: Bytes) {
        self.entries.insert(id, data);
    }

    pub fn wants_seen(&self) -> u32 {
        self.wants.load(Ordering::SeqCst)
    }

    pub fn cancelled_ids(&self) -> Vec<ContentId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn fetch_manifest(&self, id: ContentId) -> Result<Option<Vec<u8>>, NetError> {
        self.manifest_reqs.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(NetError::Connect("mock provider unreachable".into()));
        }
        Ok(self.entries.get(&id).map(|b| b.to_vec()))
    }

    async fn fetch_block(&self, id: ContentId) -> Result<Option<Bytes>, NetError> {
        self.wants.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(NetError::Connect("mock provider unreachable".into()));
        }
        if let Some(delay) = self.block_delay {
            tokio::time::sleep(delay).await;
        }
        if self.corrupt_blocks {
            return Ok(Some(Bytes::from_static(b"definitely not the chunk")));
        }
        Ok(self.entries.get(&id).cloned())
    }

    async fn have(&self, ids: &[ContentId]) -> Result<Vec<ContentId>, NetError> {
        if self.unreachable {
            return Err(NetError::Connect("mock provider unreachable".into()));
        }
        Ok(ids
            .iter()
            .filter(|id| self.entries.contains_key(id))
            .copied()
            .collect())
    }

    async fn cancel(&self, ids: &[ContentId]) -> Result<(), NetError> {
        self.cancelled.lock().unwrap().extend_from_slice(ids);
        Ok(())
    }
}

/// Build an exchange over a fresh memory store and the given providers
/// (registered as globals in a static directory).
pub async fn exchange_with(
    config: ExchangeConfig,
    providers: Vec<Arc<MockProvider>>,
) -> (Exchange, Arc<dyn ChunkStore>) {
    let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
    let directory = Arc::new(StaticDirectory::new());
    for provider in providers {
        directory.add_global(provider as Arc<dyn Provider>).await;
    }
    let exchange = Exchange::new(config, store.clone(), directory as Arc<dyn ProviderDirectory>);
    (exchange, store)
}

/// Number of raw (chunk) entries in a store.
pub async fn raw_entry_count(store: &Arc<dyn ChunkStore>) -> usize {
    store
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|id| id.codec() == brook_types::Codec::Raw)
        .count()
}
