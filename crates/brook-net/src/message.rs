//! Wire messages for the want/have/block exchange.
//!
//! A closed set of tagged variants, serialized with postcard over the
//! transport's reliable, ordered, authenticated streams. Unknown tags and
//! missing fields fail at decode time; there are no open-ended maps.

use brook_types::ContentId;
use serde::{Deserialize, Serialize};

/// Protocol messages exchanged between brook nodes.
///
/// Request/response pairs travel on a bi-directional stream; notifications
/// ([`ExchangeMessage::Have`] advertisements and [`ExchangeMessage::Cancel`])
/// may also travel on uni-directional streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeMessage {
    /// Request a manifest by its identifier (expects [`ExchangeMessage::ManifestRes`]).
    ManifestReq {
        /// Identifier of the wanted manifest (codec `manifest`).
        id: ContentId,
    },

    /// Response to a [`ExchangeMessage::ManifestReq`].
    ManifestRes {
        /// The requested identifier, echoed back.
        id: ContentId,
        /// Serialized manifest bytes, or `None` if this node doesn't have it.
        manifest: Option<Vec<u8>>,
    },

    /// Ask for the listed chunks.
    ///
    /// On a bi-directional stream with a single id, the provider answers
    /// with a [`ExchangeMessage::Block`] if it can serve the chunk, or with
    /// its [`ExchangeMessage::Have`] subset of the requested ids if not.
    Want {
        /// Identifiers of the wanted chunks.
        ids: Vec<ContentId>,
    },

    /// Advertise which of a set of identifiers this node can serve.
    ///
    /// Sent as the negative/partial answer to a [`ExchangeMessage::Want`],
    /// and as the response to a have-query (a `Have` request listing the
    /// ids in question).
    Have {
        /// The subset of queried identifiers this node holds.
        ids: Vec<ContentId>,
    },

    /// A single verified-by-the-receiver chunk transfer.
    Block {
        /// Identifier of the chunk.
        id: ContentId,
        /// The chunk bytes. The receiver verifies the hash before any use.
        data: Vec<u8>,
    },

    /// Withdraw outstanding wants for the listed identifiers, because the
    /// chunks were obtained elsewhere or the session was cancelled.
    Cancel {
        /// Identifiers whose wants are withdrawn.
        ids: Vec<ContentId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_types::{Codec, HashAlgorithm};

    fn id(data: &[u8]) -> ContentId {
        ContentId::for_bytes(Codec::Raw, HashAlgorithm::Blake3, data)
    }

    #[test]
    fn test_message_roundtrip_postcard() {
        let messages = vec![
            ExchangeMessage::ManifestReq { id: id(b"m") },
            ExchangeMessage::ManifestRes {
                id: id(b"m"),
                manifest: Some(vec![1, 2, 3]),
            },
            ExchangeMessage::ManifestRes {
                id: id(b"m"),
                manifest: None,
            },
            ExchangeMessage::Want {
                ids: vec![id(b"a"), id(b"b")],
            },
            ExchangeMessage::Have { ids: vec![id(b"a")] },
            ExchangeMessage::Block {
                id: id(b"a"),
                data: b"chunk bytes".to_vec(),
            },
            ExchangeMessage::Cancel {
                ids: vec![id(b"b")],
            },
        ];

        for message in &messages {
            let encoded = postcard::to_allocvec(message).unwrap();
            let decoded: ExchangeMessage = postcard::from_bytes(&encoded).unwrap();
            assert_eq!(message, &decoded);
        }
    }

    #[test]
    fn test_unknown_variant_rejected() {
        // Variant tags are a postcard varint; 200 is outside the enum.
        let bogus = [200u8, 0, 0];
        assert!(postcard::from_bytes::<ExchangeMessage>(&bogus).is_err());
    }

    #[test]
    fn test_truncated_message_rejected() {
        let encoded = postcard::to_allocvec(&ExchangeMessage::Block {
            id: id(b"a"),
            data: b"0123456789".to_vec(),
        })
        .unwrap();
        assert!(postcard::from_bytes::<ExchangeMessage>(&encoded[..encoded.len() - 3]).is_err());
    }
}
