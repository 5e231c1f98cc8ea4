//! Provider and discovery boundaries consumed by the exchange engine.

use std::collections::HashMap;
use std::sync::Arc;

use brook_types::{ContentId, ProviderId};
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::NetError;

/// The per-peer client surface the exchange engine drives.
///
/// Implemented over the QUIC transport for real peers
/// ([`RemoteProvider`](crate::RemoteProvider)) and by in-process mocks in
/// exchange tests. Returned block bytes are *not* verified here — the
/// exchange engine verifies every block against the manifest before any
/// other action, so a misbehaving provider is detected and penalized in
/// one place.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable identity of this provider, for scoring and logging.
    fn id(&self) -> ProviderId;

    /// Fetch a serialized manifest. `None` if the provider doesn't have it.
    async fn fetch_manifest(&self, id: ContentId) -> Result<Option<Vec<u8>>, NetError>;

    /// Fetch a single chunk. `None` if the provider doesn't have it.
    async fn fetch_block(&self, id: ContentId) -> Result<Option<Bytes>, NetError>;

    /// Query which of `ids` the provider can serve.
    async fn have(&self, ids: &[ContentId]) -> Result<Vec<ContentId>, NetError>;

    /// Withdraw outstanding wants for `ids`. Best effort.
    async fn cancel(&self, ids: &[ContentId]) -> Result<(), NetError>;
}

/// Maps a content identifier to the set of providers believed to have it.
///
/// This is the discovery boundary: a DHT, a tracker, or a static peer list
/// all fit behind it. The exchange engine only ever calls these two methods.
#[async_trait::async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Resolve an identifier to candidate providers.
    async fn locate(&self, id: ContentId) -> Vec<Arc<dyn Provider>>;

    /// Record that `provider` can serve `id`.
    async fn announce(&self, id: ContentId, provider: Arc<dyn Provider>);
}

/// In-memory directory: explicit announcements plus a set of peers assumed
/// to serve everything (the configured bootstrap peers of a small mesh).
#[derive(Default)]
pub struct StaticDirectory {
    by_id: RwLock<HashMap<ContentId, Vec<Arc<dyn Provider>>>>,
    global: RwLock<Vec<Arc<dyn Provider>>>,
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider consulted for every identifier.
    pub async fn add_global(&self, provider: Arc<dyn Provider>) {
        self.global.write().await.push(provider);
    }
}

#[async_trait::async_trait]
impl ProviderDirectory for StaticDirectory {
    async fn locate(&self, id: ContentId) -> Vec<Arc<dyn Provider>> {
        let mut found: Vec<Arc<dyn Provider>> = Vec::new();
        let mut seen = Vec::new();

        let by_id = self.by_id.read().await;
        if let Some(providers) = by_id.get(&id) {
            for p in providers {
                seen.push(p.id());
                found.push(p.clone());
            }
        }
        drop(by_id);

        for p in self.global.read().await.iter() {
            if !seen.contains(&p.id()) {
                found.push(p.clone());
            }
        }
        found
    }

    async fn announce(&self, id: ContentId, provider: Arc<dyn Provider>) {
        let mut by_id = self.by_id.write().await;
        let providers = by_id.entry(id).or_default();
        if providers.iter().all(|p| p.id() != provider.id()) {
            debug!(%id, provider = %provider.id(), "announced provider");
            providers.push(provider);
        }
    }
}
