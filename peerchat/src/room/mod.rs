//! Per-room message relay.
//!
//! A [`RoomRelay`] joins one room's topic on a [`PubSub`] host and runs two
//! tasks for as long as it lives:
//!
//! ```text
//! Presentation ── outbound (String) ──► publish loop ──► topic.publish
//! Presentation ◄── inbound (ChatEnvelope) ── subscribe loop ◄── subscription.next
//! Presentation ◄── logs (LogEvent) ── both loops
//! ```
//!
//! Both tasks share one cancellation scope, cancelled by [`RoomRelay::exit`]
//! (or by dropping the relay). Loop-internal failures never cross the loop
//! boundary; they are reported as [`LogEvent`]s.

mod loops;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use peerchat_proto::envelope::ChatEnvelope;
use peerchat_proto::topic;

use crate::transport::{PeerId, PubSub, PubSubTopic, Subscription, TransportError};

/// Default capacity of each of the three relay channels.
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Errors returned by [`RoomRelay::join`].
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The transport refused to join the room's topic.
    #[error("failed to join topic {topic}: {source}")]
    Join {
        /// Topic that was being joined.
        topic: String,
        /// Underlying transport error.
        source: TransportError,
    },

    /// The topic was joined but the subscription could not be opened.
    #[error("failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        /// Topic that was being subscribed to.
        topic: String,
        /// Underlying transport error.
        source: TransportError,
    },
}

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of the inbound, outbound and log channels. A full channel
    /// makes the sender wait; nothing is dropped.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Tag of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogPrefix {
    /// An outbound message could not be encoded or published.
    PubError,
    /// An inbound payload could not be decoded.
    SubError,
    /// The subscription terminated; no more inbound messages will arrive.
    SubClosed,
}

impl LogPrefix {
    /// Short tag used when rendering the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PubError => "puberr",
            Self::SubError => "suberr",
            Self::SubClosed => "subclosed",
        }
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relay-internal failure reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// What kind of failure this is.
    pub prefix: LogPrefix,
    /// Human-readable description.
    pub message: String,
}

impl LogEvent {
    /// Creates a log event.
    pub fn new(prefix: LogPrefix, message: impl Into<String>) -> Self {
        Self {
            prefix,
            message: message.into(),
        }
    }
}

/// Presentation-facing ends of the relay's channels.
#[derive(Debug)]
pub struct RoomChannels {
    /// Messages from other peers, in transport delivery order.
    ///
    /// Yields `None` once the subscription has terminated, which is reported
    /// by a [`LogPrefix::SubClosed`] event. It also yields `None` after
    /// [`RoomRelay::exit`] or after the relay is dropped; no event marks
    /// that case.
    pub inbound: mpsc::Receiver<ChatEnvelope>,
    /// Strings to publish to the room, in submission order.
    pub outbound: mpsc::Sender<String>,
    /// Relay-internal failures. Yields `None` once both loops have stopped.
    pub logs: mpsc::Receiver<LogEvent>,
}

/// One joined room.
///
/// Owns the topic and subscription handles exclusively and releases them in
/// [`exit`](Self::exit). Dropping the relay without calling `exit` still
/// cancels its scope, which stops both loops.
pub struct RoomRelay<T: PubSubTopic> {
    room_name: String,
    user_name: Arc<RwLock<String>>,
    self_id: PeerId,
    topic: Arc<T>,
    subscription: Arc<T::Subscription>,
    scope: CancellationToken,
}

impl<T: PubSubTopic> RoomRelay<T> {
    /// Joins `room_name` on `host` as `user_name` and starts both loops.
    ///
    /// An empty `user_name` becomes `"newuser"` and an empty `room_name`
    /// becomes `"lobby"`. The local peer id is read from the host once, here.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Join`] or [`RelayError::Subscribe`] if the
    /// transport fails; no loop is started in that case.
    pub async fn join<H>(
        host: &H,
        user_name: &str,
        room_name: &str,
        config: &RelayConfig,
    ) -> Result<(Self, RoomChannels), RelayError>
    where
        H: PubSub<Topic = T>,
    {
        let user_name = topic::user_or_default(user_name);
        let room_name = topic::room_or_default(room_name);
        let topic_name = topic::room_topic(&room_name);

        let topic = host
            .join(&topic_name)
            .await
            .map_err(|source| RelayError::Join {
                topic: topic_name.clone(),
                source,
            })?;

        let subscription = match topic.subscribe().await {
            Ok(sub) => sub,
            Err(source) => {
                if let Err(e) = topic.close().await {
                    tracing::warn!(topic = %topic_name, error = %e, "failed to close topic after subscribe error");
                }
                return Err(RelayError::Subscribe {
                    topic: topic_name,
                    source,
                });
            }
        };

        // mpsc::channel panics on a zero capacity.
        let capacity = config.channel_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (logs_tx, logs_rx) = mpsc::channel(capacity);

        let relay = Self {
            room_name,
            user_name: Arc::new(RwLock::new(user_name)),
            self_id: host.local_peer_id(),
            topic: Arc::new(topic),
            subscription: Arc::new(subscription),
            scope: CancellationToken::new(),
        };

        tokio::spawn(loops::subscribe_loop(loops::SubscribeLoop {
            subscription: Arc::clone(&relay.subscription),
            scope: relay.scope.clone(),
            self_id: relay.self_id.clone(),
            inbound: inbound_tx,
            logs: logs_tx.clone(),
        }));
        tokio::spawn(loops::publish_loop(loops::PublishLoop {
            topic: Arc::clone(&relay.topic),
            scope: relay.scope.clone(),
            self_id: relay.self_id.clone(),
            user_name: Arc::clone(&relay.user_name),
            outbound: outbound_rx,
            logs: logs_tx,
        }));

        tracing::info!(
            room = %relay.room_name,
            topic = %topic_name,
            peer_id = %relay.self_id,
            "joined room"
        );

        Ok((
            relay,
            RoomChannels {
                inbound: inbound_rx,
                outbound: outbound_tx,
                logs: logs_rx,
            },
        ))
    }

    /// Peers the transport currently sees subscribed to this room, excluding
    /// ourselves. A snapshot taken at call time.
    #[must_use]
    pub fn peer_list(&self) -> Vec<PeerId> {
        self.topic.list_peers()
    }

    /// Replaces the display name used for messages published from now on.
    ///
    /// A publish already in flight may carry either the old or the new name.
    pub fn update_user(&self, user_name: impl Into<String>) {
        *self.user_name.write() = user_name.into();
    }

    /// Current display name.
    #[must_use]
    pub fn user_name(&self) -> String {
        self.user_name.read().clone()
    }

    /// Room name, after defaulting.
    #[must_use]
    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    /// Name of the transport topic backing this room.
    #[must_use]
    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Local peer id, as captured at join time.
    #[must_use]
    pub const fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Leaves the room.
    ///
    /// Cancels the subscription, then closes the topic, then cancels the
    /// shared scope. The scope is cancelled on every path out of this
    /// function. Returning only means cancellation has been signalled; the
    /// loops finish on their own shortly after.
    pub async fn exit(self) {
        let _scope = self.scope.clone().drop_guard();

        self.subscription.cancel();
        if let Err(e) = self.topic.close().await {
            tracing::warn!(topic = %self.topic.name(), error = %e, "failed to close topic");
        }

        tracing::info!(room = %self.room_name, "left room");
    }
}

impl<T: PubSubTopic> Drop for RoomRelay<T> {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}
