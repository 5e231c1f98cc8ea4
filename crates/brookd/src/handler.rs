//! Incoming protocol handler for the brook daemon.
//!
//! Implements iroh's [`ProtocolHandler`] trait to handle incoming QUIC
//! connections dispatched by the iroh [`Router`].
//!
//! [`ProtocolHandler`]: iroh::protocol::ProtocolHandler
//! [`Router`]: iroh::protocol::Router

use std::fmt;
use std::sync::Arc;

use brook_exchange::serve_message;
use brook_net::BrookTransport;
use brook_store::ChunkStore;
use iroh::endpoint::Connection;
use iroh::protocol::AcceptError;
use tracing::debug;

/// Handles incoming brook protocol connections.
///
/// Registered with an iroh [`Router`](iroh::protocol::Router). Requests on
/// bi-directional streams (manifest requests, wants, have queries) are
/// answered from the local store; uni-directional notifications (cancels)
/// are logged and dropped, since serving is request/response.
pub struct BrookProtocol {
    store: Arc<dyn ChunkStore>,
}

impl fmt::Debug for BrookProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrookProtocol").finish_non_exhaustive()
    }
}

impl BrookProtocol {
    /// Create a new protocol handler serving from `store`.
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

impl iroh::protocol::ProtocolHandler for BrookProtocol {
    async fn accept(&self, conn: Connection) -> Result<(), AcceptError> {
        let remote = conn.remote_id();
        debug!(remote = %remote.fmt_short(), "accepted peer connection");

        // Uni-directional streams carry notifications (cancel, have).
        let conn_uni = conn.clone();
        let store_uni = self.store.clone();
        tokio::spawn(async move {
            BrookTransport::handle_connection(conn_uni, move |msg, _conn| {
                let store = store_uni.clone();
                async move {
                    // Responses to notifications are discarded.
                    let _ = serve_message(&store, msg).await;
                }
            })
            .await;
        });

        // Bi-directional streams carry request/response pairs.
        let store_bi = self.store.clone();
        tokio::spawn(async move {
            BrookTransport::handle_bi_streams(conn, move |msg| {
                let store = store_bi.clone();
                async move { serve_message(&store, msg).await }
            })
            .await;
        });

        Ok(())
    }
}
