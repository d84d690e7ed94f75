//! Publish/subscribe transport abstraction for `PeerChat`.
//!
//! Defines the [`PubSub`], [`PubSubTopic`] and [`Subscription`] traits that a
//! room relay is written against. Concrete implementations:
//! - [`memory::MemoryNetwork`] -- in-process bus for tests and offline mode
//! - [`hub::HubHost`] -- WebSocket client of a `peerchat-hub` server

pub mod hub;
pub mod memory;

use std::fmt;
use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Unique identifier for a peer on the transport.
///
/// The wrapped string is the canonical text form; it is what gets written
/// into the `senderid` field of outgoing envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new peer identifier from its canonical string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the canonical string form of this peer ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A payload delivered through a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Peer that published the payload, as attested by the transport.
    pub from: PeerId,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the transport has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The caller's cancellation scope was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The subscription was cancelled by its owner.
    #[error("subscription cancelled")]
    SubscriptionCancelled,

    /// The topic handle has been closed.
    #[error("topic {0} is closed")]
    TopicClosed(String),

    /// This host already holds a handle for the topic.
    #[error("topic {0} is already joined")]
    AlreadyJoined(String),

    /// The payload exceeds the transport's size limit.
    #[error("payload too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The remote endpoint could not be reached.
    #[error("{0} is unreachable")]
    Unreachable(String),

    /// The remote endpoint violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A host attached to a publish/subscribe network.
pub trait PubSub: Send + Sync {
    /// Topic handle type returned by [`join`](PubSub::join).
    type Topic: PubSubTopic;

    /// Identity of this host on the network.
    fn local_peer_id(&self) -> PeerId;

    /// Join a named topic, returning a handle used to publish and subscribe.
    fn join(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Self::Topic, TransportError>> + Send;
}

/// A joined topic.
///
/// Handles are shared between the relay and its publishing task, so every
/// method takes `&self`.
pub trait PubSubTopic: Send + Sync + 'static {
    /// Subscription type returned by [`subscribe`](PubSubTopic::subscribe).
    type Subscription: Subscription;

    /// Name of the topic.
    fn name(&self) -> &str;

    /// Open a subscription delivering every payload published to the topic
    /// from now on, the local host's own publications included.
    fn subscribe(
        &self,
    ) -> impl Future<Output = Result<Self::Subscription, TransportError>> + Send;

    /// Publish a payload. Gives up with [`TransportError::Cancelled`] if
    /// `scope` is cancelled first.
    fn publish(
        &self,
        scope: &CancellationToken,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Peers currently known to be subscribed to the topic, excluding the
    /// local host. A snapshot; it may be stale as soon as it returns.
    fn list_peers(&self) -> Vec<PeerId>;

    /// Release the topic handle. Publishing afterwards fails.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A live subscription to a topic.
pub trait Subscription: Send + Sync + 'static {
    /// Wait for the next delivered payload, in delivery order.
    ///
    /// Returns [`TransportError::Cancelled`] if `scope` is cancelled first.
    /// Any other error means the subscription has terminated and no further
    /// payloads will arrive.
    fn next(
        &self,
        scope: &CancellationToken,
    ) -> impl Future<Output = Result<RawMessage, TransportError>> + Send;

    /// Stop the subscription. A pending or later [`next`](Subscription::next)
    /// returns [`TransportError::SubscriptionCancelled`].
    fn cancel(&self);
}
