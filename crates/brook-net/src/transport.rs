//! Network transport built on iroh QUIC.
//!
//! [`BrookTransport`] wraps an iroh [`Endpoint`] and provides:
//! - Connection pooling (reuse connections to the same peer).
//! - Message send/receive with length-prefixed postcard encoding.
//! - [`RemoteProvider`], adapting a pooled connection to the
//!   [`Provider`] trait the exchange engine consumes.

use std::collections::HashMap;
use std::sync::Arc;

use brook_types::{ContentId, ProviderId};
use bytes::Bytes;
use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::{Endpoint, EndpointAddr, SecretKey};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::message::ExchangeMessage;
use crate::provider::Provider;

/// Maximum message size: 64 MB. Block data is typically ≤4 MB, but a
/// manifest for a very large object can reference many chunks.
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default ALPN protocol identifier (no mesh secret).
pub const BROOK_ALPN: &[u8] = b"brook/0";

/// Derive a mesh-specific ALPN from a shared secret.
///
/// The ALPN is `brook/0/<first 16 hex chars of blake3(secret)>`. Nodes with
/// different secrets get different ALPNs and cannot establish QUIC
/// connections to each other; the TLS handshake itself rejects the mismatch
/// before any application data is exchanged.
pub fn mesh_alpn(secret: &[u8]) -> Vec<u8> {
    let hash = blake3::hash(secret);
    let hex = hash.to_hex();
    format!("brook/0/{}", &hex[..16]).into_bytes()
}

/// Network transport for inter-node communication.
///
/// Manages an iroh QUIC endpoint and a connection pool to peer nodes, and
/// provides message send/receive with length-prefixed postcard frames.
pub struct BrookTransport {
    endpoint: Endpoint,
    /// Cached connections to remote peers, keyed by their iroh endpoint ID.
    ///
    /// Uses `Mutex` (not `RwLock`) to prevent a TOCTOU race where concurrent
    /// callers all see "no cached connection", each establish a separate
    /// QUIC connection to the same peer, and overwrite each other in the
    /// cache. Dropped connections abort in-flight data.
    connections: Arc<Mutex<HashMap<iroh::EndpointId, Connection>>>,
    /// ALPN used for outgoing connections.
    alpn: Vec<u8>,
}

impl BrookTransport {
    /// Create a new transport with the default ALPN (`brook/0`).
    ///
    /// Use [`iroh::RelayMode::Disabled`] for tests that don't need relay
    /// servers.
    pub async fn bind(secret_key: SecretKey, relay_mode: iroh::RelayMode) -> Result<Self, NetError> {
        Self::bind_with_alpn(secret_key, relay_mode, BROOK_ALPN.to_vec()).await
    }

    /// Create a new transport with a mesh-specific ALPN (see [`mesh_alpn`]).
    pub async fn bind_with_alpn(
        secret_key: SecretKey,
        relay_mode: iroh::RelayMode,
        alpn: Vec<u8>,
    ) -> Result<Self, NetError> {
        let endpoint = Endpoint::builder(iroh::endpoint::presets::N0)
            .secret_key(secret_key)
            .alpns(vec![alpn.clone()])
            .relay_mode(relay_mode)
            .bind()
            .await
            .map_err(|e| NetError::Endpoint(e.to_string()))?;

        Ok(Self {
            endpoint,
            connections: Arc::new(Mutex::new(HashMap::new())),
            alpn,
        })
    }

    /// Create a transport wrapping an existing endpoint with a custom ALPN.
    ///
    /// Use this when the endpoint is shared with an iroh
    /// [`Router`](iroh::protocol::Router) and the transport is only used for
    /// *outgoing* connections.
    pub fn from_endpoint_with_alpn(endpoint: Endpoint, alpn: Vec<u8>) -> Self {
        Self {
            endpoint,
            connections: Arc::new(Mutex::new(HashMap::new())),
            alpn,
        }
    }

    /// Return a reference to the underlying iroh endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Return the [`EndpointAddr`] of this transport (ID + addresses).
    pub fn addr(&self) -> EndpointAddr {
        self.endpoint.addr()
    }

    /// Return this endpoint's public identity.
    pub fn endpoint_id(&self) -> iroh::EndpointId {
        self.endpoint.id()
    }

    // -------------------------------------------------------------------
    // Connection management
    // -------------------------------------------------------------------

    /// Get or establish a QUIC connection to a remote peer.
    ///
    /// Holds the connection cache lock for the entire duration so that
    /// concurrent callers never race to create duplicate connections.
    async fn get_connection(&self, addr: EndpointAddr) -> Result<Connection, NetError> {
        let remote_id = addr.id;
        let mut cache = self.connections.lock().await;

        if let Some(conn) = cache.get(&remote_id)
            && conn.close_reason().is_none()
        {
            return Ok(conn.clone());
        }

        debug!(remote = %remote_id.fmt_short(), "connecting to peer");
        let conn = self
            .endpoint
            .connect(addr, &self.alpn)
            .await
            .map_err(|e| NetError::Connect(e.to_string()))?;

        cache.insert(remote_id, conn.clone());
        Ok(conn)
    }

    /// Remove a cached connection (e.g. after detecting it's dead).
    pub async fn remove_connection(&self, id: &iroh::EndpointId) {
        let mut cache = self.connections.lock().await;
        cache.remove(id);
    }

    // -------------------------------------------------------------------
    // Message send/receive
    // -------------------------------------------------------------------

    /// Send a message to a remote peer on a new uni-directional stream.
    pub async fn send_to(&self, addr: EndpointAddr, msg: &ExchangeMessage) -> Result<(), NetError> {
        let conn = self.get_connection(addr).await?;
        Self::send_message(&conn, msg).await
    }

    /// Send a request on a new bi-directional stream and await the response.
    pub async fn request(
        &self,
        addr: EndpointAddr,
        msg: &ExchangeMessage,
    ) -> Result<ExchangeMessage, NetError> {
        let conn = self.get_connection(addr).await?;

        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| NetError::StreamOpen(e.to_string()))?;

        Self::send_on_stream(&mut send, msg).await?;
        Self::recv_message(&mut recv).await
    }

    /// Send a message over a new uni-directional stream on a connection.
    ///
    /// The message is length-prefixed (4-byte big-endian) then
    /// postcard-encoded.
    pub async fn send_message(conn: &Connection, message: &ExchangeMessage) -> Result<(), NetError> {
        let mut send = conn
            .open_uni()
            .await
            .map_err(|e| NetError::StreamOpen(e.to_string()))?;
        Self::send_on_stream(&mut send, message).await
    }

    /// Send a message on an already-open send stream.
    pub async fn send_on_stream(
        send: &mut SendStream,
        message: &ExchangeMessage,
    ) -> Result<(), NetError> {
        let payload =
            postcard::to_allocvec(message).map_err(|e| NetError::Serialization(e.to_string()))?;
        send.write_all(&(payload.len() as u32).to_be_bytes())
            .await?;
        send.write_all(&payload).await?;
        send.finish()?;
        Ok(())
    }

    /// Receive a message from a receive stream.
    ///
    /// Reads a 4-byte big-endian length prefix, then reads that many bytes
    /// and deserializes with postcard.
    pub async fn recv_message(recv: &mut RecvStream) -> Result<ExchangeMessage, NetError> {
        let mut len_buf = [0u8; 4];
        recv.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(NetError::Serialization(format!(
                "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
            )));
        }

        let payload = recv.read_to_end(len).await?;
        postcard::from_bytes(&payload).map_err(|e| NetError::Serialization(e.to_string()))
    }

    // -------------------------------------------------------------------
    // Incoming message handling
    // -------------------------------------------------------------------

    /// Accept a single incoming connection and return it.
    ///
    /// Returns `None` if the endpoint is shutting down.
    pub async fn accept(&self) -> Option<Connection> {
        let incoming = self.endpoint.accept().await?;
        match incoming.await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!("failed to accept connection: {e}");
                None
            }
        }
    }

    /// Accept incoming uni-directional streams on a connection and dispatch
    /// messages to the provided handler. Runs until the connection closes.
    pub async fn handle_connection<F, Fut>(conn: Connection, handler: F)
    where
        F: Fn(ExchangeMessage, Connection) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        loop {
            match conn.accept_uni().await {
                Ok(mut recv) => match Self::recv_message(&mut recv).await {
                    Ok(msg) => handler(msg, conn.clone()).await,
                    Err(e) => {
                        warn!("failed to decode message: {e}");
                    }
                },
                Err(e) => {
                    debug!("connection closed: {e}");
                    break;
                }
            }
        }
    }

    /// Handle incoming bi-directional streams (request/response patterns).
    ///
    /// For each incoming bi stream, reads a request and calls the handler,
    /// which may produce a response message sent back on the same stream.
    pub async fn handle_bi_streams<F, Fut>(conn: Connection, handler: F)
    where
        F: Fn(ExchangeMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Option<ExchangeMessage>> + Send,
    {
        loop {
            match conn.accept_bi().await {
                Ok((mut send, mut recv)) => match Self::recv_message(&mut recv).await {
                    Ok(request) => {
                        if let Some(response) = handler(request).await
                            && let Err(e) = Self::send_on_stream(&mut send, &response).await
                        {
                            warn!("failed to send response: {e}");
                        }
                    }
                    Err(e) => {
                        warn!("failed to decode bi-stream request: {e}");
                    }
                },
                Err(e) => {
                    debug!("connection closed (bi): {e}");
                    break;
                }
            }
        }
    }

    /// Gracefully close the transport.
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}

/// A remote peer, adapted to the [`Provider`] trait over a pooled
/// transport connection.
///
/// Block bytes are passed through unverified; the exchange engine owns
/// verification and provider penalties.
pub struct RemoteProvider {
    transport: Arc<BrookTransport>,
    addr: EndpointAddr,
}

impl RemoteProvider {
    /// Create a provider handle for the peer at `addr`.
    pub fn new(transport: Arc<BrookTransport>, addr: EndpointAddr) -> Self {
        Self { transport, addr }
    }

    /// The peer's endpoint address.
    pub fn addr(&self) -> &EndpointAddr {
        &self.addr
    }
}

#[async_trait::async_trait]
impl Provider for RemoteProvider {
    fn id(&self) -> ProviderId {
        ProviderId::from(*self.addr.id.as_bytes())
    }

    async fn fetch_manifest(&self, id: ContentId) -> Result<Option<Vec<u8>>, NetError> {
        let response = self
            .transport
            .request(self.addr.clone(), &ExchangeMessage::ManifestReq { id })
            .await?;

        match response {
            ExchangeMessage::ManifestRes {
                id: res_id,
                manifest,
            } => {
                if res_id != id {
                    warn!(requested = %id, received = %res_id, "manifest response id mismatch");
                }
                Ok(manifest)
            }
            other => Err(NetError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn fetch_block(&self, id: ContentId) -> Result<Option<Bytes>, NetError> {
        let response = self
            .transport
            .request(self.addr.clone(), &ExchangeMessage::Want { ids: vec![id] })
            .await?;

        match response {
            ExchangeMessage::Block { id: res_id, data } => {
                if res_id != id {
                    warn!(requested = %id, received = %res_id, "block response id mismatch");
                }
                debug!(%id, size = data.len(), "received block from peer");
                Ok(Some(Bytes::from(data)))
            }
            // A Have answer (with or without the id) means no block follows.
            ExchangeMessage::Have { .. } => Ok(None),
            other => Err(NetError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn have(&self, ids: &[ContentId]) -> Result<Vec<ContentId>, NetError> {
        let response = self
            .transport
            .request(
                self.addr.clone(),
                &ExchangeMessage::Have { ids: ids.to_vec() },
            )
            .await?;

        match response {
            ExchangeMessage::Have { ids } => Ok(ids),
            other => Err(NetError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn cancel(&self, ids: &[ContentId]) -> Result<(), NetError> {
        self.transport
            .send_to(
                self.addr.clone(),
                &ExchangeMessage::Cancel { ids: ids.to_vec() },
            )
            .await
    }
}
