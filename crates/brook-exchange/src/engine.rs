//! [`Exchange`] — the engine that ties store, discovery, and sessions
//! together and exposes the publish/fetch pipeline.

use std::sync::Arc;

use brook_cas::{Chunker, ManifestOptions, build_manifest, serialize_manifest};
use brook_net::{Provider, ProviderDirectory};
use brook_store::ChunkStore;
use brook_types::{ContentId, ExchangeConfig, Manifest};
use bytes::Bytes;
use tracing::{debug, info};

use crate::error::ExchangeError;
use crate::session::{FetchResult, FetchSession};

/// The exchange engine: owns the local store, the discovery boundary, and
/// the configuration every session runs with.
pub struct Exchange {
    config: ExchangeConfig,
    store: Arc<dyn ChunkStore>,
    directory: Arc<dyn ProviderDirectory>,
    /// How this node appears to the directory when announcing published
    /// content. `None` for fetch-only nodes.
    self_provider: Option<Arc<dyn Provider>>,
}

impl Exchange {
    /// Create an engine with explicit configuration.
    pub fn new(
        config: ExchangeConfig,
        store: Arc<dyn ChunkStore>,
        directory: Arc<dyn ProviderDirectory>,
    ) -> Self {
        Self {
            config,
            store,
            directory,
            self_provider: None,
        }
    }

    /// Set the provider identity announced for published content.
    pub fn with_self_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.self_provider = Some(provider);
        self
    }

    /// The engine's configuration.
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// The local store.
    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Publish path
    // ------------------------------------------------------------------

    /// Publish an object: chunk it, store every chunk and the manifest
    /// locally, and announce the content to the directory.
    ///
    /// Returns the manifest; its identifier is what other nodes fetch.
    pub async fn publish(&self, name: &str, data: &[u8]) -> Result<Manifest, ExchangeError> {
        let opts = ManifestOptions {
            name: name.to_string(),
            chunk_size: self.config.chunk_size,
            hash_algorithm: self.config.hash_algorithm,
        };
        let manifest = build_manifest(data, &opts)?;

        let chunker = Chunker::new(self.config.chunk_size, self.config.hash_algorithm);
        for chunk in chunker.split(data) {
            self.store.put(chunk.id(), chunk.data).await?;
        }

        let manifest_bytes = serialize_manifest(&manifest)?;
        self.store
            .put(manifest.identifier, Bytes::from(manifest_bytes))
            .await?;

        if let Some(provider) = &self.self_provider {
            self.directory
                .announce(manifest.identifier, provider.clone())
                .await;
            for chunk in &manifest.chunks {
                self.directory.announce(chunk.id(), provider.clone()).await;
            }
            debug!(identifier = %manifest.identifier, "announced published content");
        }

        info!(
            identifier = %manifest.identifier,
            name,
            size = manifest.total_size,
            chunks = manifest.chunk_count,
            "published object"
        );
        Ok(manifest)
    }

    // ------------------------------------------------------------------
    // Fetch path
    // ------------------------------------------------------------------

    /// Create a fetch session for `target` without running it, so the
    /// caller can take a cancel token first.
    pub fn session(&self, target: ContentId) -> FetchSession {
        FetchSession::new(
            target,
            self.store.clone(),
            self.directory.clone(),
            self.config.clone(),
        )
    }

    /// Fetch an object by its manifest identifier and return the verified
    /// bytes.
    pub async fn fetch(&self, target: ContentId) -> Result<FetchResult, ExchangeError> {
        self.session(target).run().await
    }
}
