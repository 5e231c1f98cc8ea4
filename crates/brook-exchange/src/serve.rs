//! Serve side of the exchange: answering wants from a local store.
//!
//! [`serve_message`] is the single dispatch point shared by the daemon's
//! connection handler and in-process tests. [`LocalProvider`] adapts a
//! local store to the [`Provider`] trait so a node can serve its own
//! content (and tests can wire meshes without a network).

use std::sync::Arc;

use brook_net::{ExchangeMessage, NetError, Provider};
use brook_store::ChunkStore;
use brook_types::{ContentId, ProviderId};
use bytes::Bytes;
use tracing::{debug, warn};

/// Answer a single request message from the local store.
///
/// Returns the response to send back, or `None` for notification messages
/// that take no response.
pub async fn serve_message(
    store: &Arc<dyn ChunkStore>,
    msg: ExchangeMessage,
) -> Option<ExchangeMessage> {
    match msg {
        ExchangeMessage::ManifestReq { id } => {
            let manifest = match store.try_get(id).await {
                Ok(bytes) => bytes.map(|b| b.to_vec()),
                Err(e) => {
                    warn!(%id, %e, "manifest lookup failed while serving");
                    None
                }
            };
            Some(ExchangeMessage::ManifestRes { id, manifest })
        }

        ExchangeMessage::Want { ids } => {
            // A single-id want is answered with the block when possible;
            // otherwise (and for multi-id wants) the response is the
            // have-subset so the requester can re-plan.
            if let [id] = ids[..]
                && let Ok(Some(data)) = store.try_get(id).await
            {
                debug!(%id, size = data.len(), "serving block");
                return Some(ExchangeMessage::Block {
                    id,
                    data: data.to_vec(),
                });
            }
            Some(ExchangeMessage::Have {
                ids: present_subset(store, &ids).await,
            })
        }

        ExchangeMessage::Have { ids } => Some(ExchangeMessage::Have {
            ids: present_subset(store, &ids).await,
        }),

        ExchangeMessage::Cancel { ids } => {
            // Serving is request/response; a cancel just tells us the
            // requester no longer wants these ids.
            debug!(count = ids.len(), "wants cancelled by requester");
            None
        }

        other => {
            debug!(?other, "ignoring non-request message");
            None
        }
    }
}

async fn present_subset(store: &Arc<dyn ChunkStore>, ids: &[ContentId]) -> Vec<ContentId> {
    let mut present = Vec::new();
    for &id in ids {
        if store.contains(id).await.unwrap_or(false) {
            present.push(id);
        }
    }
    present
}

/// A provider backed directly by a local store, bypassing the network.
pub struct LocalProvider {
    id: ProviderId,
    store: Arc<dyn ChunkStore>,
}

impl LocalProvider {
    /// Create a provider serving from `store` under the given identity.
    pub fn new(id: ProviderId, store: Arc<dyn ChunkStore>) -> Self {
        Self { id, store }
    }
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn fetch_manifest(&self, id: ContentId) -> Result<Option<Vec<u8>>, NetError> {
        // A corrupt or unreadable local entry is served as absent.
        match self.store.try_get(id).await {
            Ok(bytes) => Ok(bytes.map(|b| b.to_vec())),
            Err(e) => {
                warn!(%id, %e, "local manifest unavailable");
                Ok(None)
            }
        }
    }

    async fn fetch_block(&self, id: ContentId) -> Result<Option<Bytes>, NetError> {
        match self.store.try_get(id).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!(%id, %e, "local block unavailable");
                Ok(None)
            }
        }
    }

    async fn have(&self, ids: &[ContentId]) -> Result<Vec<ContentId>, NetError> {
        Ok(present_subset(&self.store, ids).await)
    }

    async fn cancel(&self, _ids: &[ContentId]) -> Result<(), NetError> {
        Ok(())
    }
}
