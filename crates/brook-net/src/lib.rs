//! Network protocol on iroh QUIC.
//!
//! This crate implements brook's network layer:
//!
//! - [`ExchangeMessage`] — the wire protocol (postcard-serialized, a closed
//!   set of tagged variants).
//! - [`Provider`] / [`ProviderDirectory`] — the boundaries the exchange
//!   engine consumes: a per-peer client surface and the discovery mechanism
//!   that maps identifiers to candidate providers.
//! - [`BrookTransport`] — iroh QUIC endpoint management, connection pooling,
//!   and length-prefixed message framing; [`RemoteProvider`] adapts a pooled
//!   connection to the [`Provider`] trait.

mod error;
mod message;
mod provider;
mod transport;

pub use error::NetError;
pub use message::ExchangeMessage;
pub use provider::{Provider, ProviderDirectory, StaticDirectory};
pub use transport::{BROOK_ALPN, BrookTransport, RemoteProvider, mesh_alpn};
