//! Hub wire protocol.
//!
//! Defines the [`HubFrame`] enum that is postcard-encoded and sent over
//! WebSocket binary frames between hub clients and the hub server. The hub
//! only reads routing metadata (topic names, peer ids); payloads are opaque.

use serde::{Deserialize, Serialize};

/// Error type for hub frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum HubCodecError {
    /// Serialization failed.
    #[error("hub frame encode error: {0}")]
    Encode(String),
    /// Deserialization failed.
    #[error("hub frame decode error: {0}")]
    Decode(String),
}

/// Frames exchanged between hub clients and the hub server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubFrame {
    /// Client announces its peer identity. Must be the first frame sent.
    Hello {
        /// Canonical peer identity of the client.
        peer_id: String,
    },

    /// Server accepts the client's identity.
    Welcome {
        /// The registered peer identity, echoed back.
        peer_id: String,
        /// Largest `Publish` payload the server accepts, in bytes.
        max_payload_size: u64,
    },

    /// Client starts receiving deliveries for a topic.
    Subscribe {
        /// Topic name.
        topic: String,
    },

    /// Client stops receiving deliveries for a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },

    /// Client publishes an opaque payload to a topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },

    /// Server reports the other subscribers of a topic just subscribed to.
    Members {
        /// Topic name.
        topic: String,
        /// Peer identities currently subscribed, excluding the recipient.
        peers: Vec<String>,
    },

    /// Another peer subscribed to a topic the recipient is subscribed to.
    PeerJoined {
        /// Topic name.
        topic: String,
        /// The peer that subscribed.
        peer_id: String,
    },

    /// Another peer left a topic the recipient is subscribed to.
    PeerLeft {
        /// Topic name.
        topic: String,
        /// The peer that left.
        peer_id: String,
    },

    /// Server delivers a published payload.
    ///
    /// `from` is always the publisher's registered identity; the server never
    /// trusts a client-provided sender.
    Deliver {
        /// Topic name.
        topic: String,
        /// Publisher identity.
        from: String,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },

    /// Server reports an error condition.
    Error {
        /// Human-readable description.
        reason: String,
    },
}

/// Encodes a [`HubFrame`] into bytes using postcard.
///
/// # Errors
///
/// Returns [`HubCodecError::Encode`] if the frame cannot be serialized.
pub fn encode(frame: &HubFrame) -> Result<Vec<u8>, HubCodecError> {
    postcard::to_allocvec(frame).map_err(|e| HubCodecError::Encode(e.to_string()))
}

/// Decodes a [`HubFrame`] from bytes using postcard.
///
/// # Errors
///
/// Returns [`HubCodecError::Decode`] if the bytes are not a valid frame.
pub fn decode(bytes: &[u8]) -> Result<HubFrame, HubCodecError> {
    postcard::from_bytes(bytes).map_err(|e| HubCodecError::Decode(e.to_string()))
}
