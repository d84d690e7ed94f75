//! WebSocket hub transport.
//!
//! Implements [`PubSub`] over a WebSocket connection to a `peerchat-hub`
//! server. One connection carries every topic the host joins: a writer task
//! drains a frame queue into the socket, and a reader task routes
//! [`HubFrame::Deliver`] frames to local subscriptions and keeps a membership
//! view per topic from `Members` / `PeerJoined` / `PeerLeft` frames.
//!
//! When the socket closes every local subscription ends and its `next`
//! returns [`TransportError::ConnectionClosed`].

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use peerchat_proto::hub::{self, HubFrame};

use super::{PeerId, PubSub, PubSubTopic, RawMessage, Subscription, TransportError};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Timeouts used while establishing a hub connection.
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    /// Timeout for the WebSocket connect.
    pub connect_timeout: Duration,
    /// Timeout for the `Welcome` reply to our `Hello`.
    pub handshake_timeout: Duration,
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

type SubId = u64;

/// State shared between the host, its topic/subscription handles and the
/// reader task.
struct HubShared {
    local_id: PeerId,
    /// Payload limit announced by the hub in `Welcome`.
    max_payload_size: usize,
    /// Frames queued for the writer task.
    outgoing: mpsc::UnboundedSender<HubFrame>,
    /// Local subscriptions per topic.
    subscriptions: Mutex<HashMap<String, HashMap<SubId, mpsc::UnboundedSender<RawMessage>>>>,
    /// Other peers subscribed to each topic, as last reported by the hub.
    members: RwLock<HashMap<String, BTreeSet<PeerId>>>,
    connected: AtomicBool,
    next_sub_id: AtomicU64,
}

impl HubShared {
    fn send_frame(&self, frame: HubFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn remove_subscription(&self, topic: &str, id: SubId) {
        let now_empty = {
            let mut subs = self.subscriptions.lock();
            let Some(local) = subs.get_mut(topic) else {
                return;
            };
            if local.remove(&id).is_none() {
                return;
            }
            let empty = local.is_empty();
            if empty {
                subs.remove(topic);
            }
            empty
        };

        if now_empty {
            self.members.write().remove(topic);
            // Best effort: the hub also drops us from the topic on disconnect.
            let _ = self.send_frame(HubFrame::Unsubscribe {
                topic: topic.to_string(),
            });
        }
    }
}

/// A host connected to a `peerchat-hub` server.
///
/// Created via [`HubHost::connect`], which opens the WebSocket, performs the
/// `Hello` / `Welcome` handshake and spawns the reader and writer tasks.
pub struct HubHost {
    shared: Arc<HubShared>,
    hub_url: String,
}

impl HubHost {
    /// Connect to a hub and register `local_id`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the connect or handshake times out.
    /// - [`TransportError::Unreachable`] if the hub refuses the connection.
    /// - [`TransportError::Protocol`] if the hub rejects or garbles the handshake.
    /// - [`TransportError::ConnectionClosed`] if the hub hangs up mid-handshake.
    pub async fn connect(
        hub_url: &str,
        local_id: PeerId,
        config: &HubClientConfig,
    ) -> Result<Self, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(hub_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = hub_url, "hub WebSocket connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = hub_url, err = %e, "hub WebSocket connect failed");
                    map_ws_connect_error(hub_url, e)
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = HubFrame::Hello {
            peer_id: local_id.as_str().to_string(),
        };
        let bytes = hub::encode(&hello).map_err(|e| TransportError::Protocol(e.to_string()))?;
        ws_sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "failed to send Hello");
                TransportError::Io(std::io::Error::other(format!("failed to send Hello: {e}")))
            })?;

        let reply = tokio::time::timeout(config.handshake_timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = hub_url, "hub handshake timed out");
                TransportError::Timeout
            })?;
        let max_payload_size = expect_welcome(reply)?;
        tracing::info!(
            peer_id = %local_id,
            url = hub_url,
            max_payload_size,
            "registered with hub"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(HubShared {
            local_id,
            max_payload_size,
            outgoing: tx,
            subscriptions: Mutex::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(true),
            next_sub_id: AtomicU64::new(0),
        });

        tokio::spawn(writer_loop(ws_sender, rx));
        tokio::spawn(reader_loop(ws_reader, Arc::downgrade(&shared)));

        Ok(Self {
            shared,
            hub_url: hub_url.to_string(),
        })
    }

    /// The hub URL this host is connected to.
    #[must_use]
    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    /// Largest payload the hub accepts, as announced during the handshake.
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        self.shared.max_payload_size
    }

    /// Whether the hub connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

impl PubSub for HubHost {
    type Topic = HubTopic;

    fn local_peer_id(&self) -> PeerId {
        self.shared.local_id.clone()
    }

    async fn join(&self, topic: &str) -> Result<HubTopic, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(HubTopic {
            name: topic.to_string(),
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        })
    }
}

/// Topic handle on a hub connection.
pub struct HubTopic {
    name: String,
    shared: Arc<HubShared>,
    closed: AtomicBool,
}

impl PubSubTopic for HubTopic {
    type Subscription = HubSubscription;

    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<HubSubscription, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::TopicClosed(self.name.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut subs = self.shared.subscriptions.lock();
            let local = subs.entry(self.name.clone()).or_default();
            local.insert(id, tx);
            local.len() == 1
        };

        if first
            && let Err(e) = self.shared.send_frame(HubFrame::Subscribe {
                topic: self.name.clone(),
            })
        {
            self.shared.remove_subscription(&self.name, id);
            return Err(e);
        }

        tracing::debug!(topic = %self.name, id, "hub subscription opened");
        Ok(HubSubscription {
            id,
            topic: self.name.clone(),
            shared: Arc::clone(&self.shared),
            rx: AsyncMutex::new(rx),
            cancelled: CancellationToken::new(),
        })
    }

    async fn publish(&self, scope: &CancellationToken, data: Vec<u8>) -> Result<(), TransportError> {
        if scope.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::TopicClosed(self.name.clone()));
        }
        // The hub would answer an oversized publish with an Error frame that
        // no caller sees, so reject it here.
        let max = self.shared.max_payload_size;
        if data.len() > max {
            return Err(TransportError::PayloadTooLarge {
                size: data.len(),
                max,
            });
        }
        self.shared.send_frame(HubFrame::Publish {
            topic: self.name.clone(),
            payload: data,
        })
    }

    fn list_peers(&self) -> Vec<PeerId> {
        self.shared
            .members
            .read()
            .get(&self.name)
            .map(|peers| {
                peers
                    .iter()
                    .filter(|p| **p != self.shared.local_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::TopicClosed(self.name.clone()));
        }
        Ok(())
    }
}

/// Subscription on a hub topic.
pub struct HubSubscription {
    id: SubId,
    topic: String,
    shared: Arc<HubShared>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<RawMessage>>,
    cancelled: CancellationToken,
}

impl Subscription for HubSubscription {
    async fn next(&self, scope: &CancellationToken) -> Result<RawMessage, TransportError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            () = self.cancelled.cancelled() => Err(TransportError::SubscriptionCancelled),
            () = scope.cancelled() => Err(TransportError::Cancelled),
            msg = rx.recv() => msg.ok_or(TransportError::ConnectionClosed),
        }
    }

    fn cancel(&self) {
        self.cancelled.cancel();
        self.shared.remove_subscription(&self.topic, self.id);
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        self.shared.remove_subscription(&self.topic, self.id);
    }
}

/// Checks the hub's reply to `Hello` and returns the announced payload limit.
fn expect_welcome(
    reply: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Result<usize, TransportError> {
    match reply {
        Some(Ok(Message::Binary(data))) => match hub::decode(&data) {
            Ok(HubFrame::Welcome {
                max_payload_size, ..
            }) => Ok(usize::try_from(max_payload_size).unwrap_or(usize::MAX)),
            Ok(HubFrame::Error { reason }) => {
                tracing::warn!(reason = %reason, "hub rejected registration");
                Err(TransportError::Protocol(format!(
                    "hub rejected registration: {reason}"
                )))
            }
            Ok(other) => {
                tracing::warn!(?other, "unexpected hub frame during handshake");
                Err(TransportError::Protocol(
                    "unexpected frame during handshake".to_string(),
                ))
            }
            Err(e) => Err(TransportError::Protocol(format!(
                "malformed handshake reply: {e}"
            ))),
        },
        Some(Ok(Message::Close(_))) | None => {
            tracing::warn!("hub closed connection during handshake");
            Err(TransportError::ConnectionClosed)
        }
        Some(Ok(_)) => Err(TransportError::Protocol(
            "unexpected non-binary frame during handshake".to_string(),
        )),
        Some(Err(e)) => Err(TransportError::Io(std::io::Error::other(format!(
            "WebSocket error during handshake: {e}"
        )))),
    }
}

/// Drains queued frames into the socket until every frame sender is gone or
/// the socket fails.
async fn writer_loop(mut ws_sender: WsSender, mut rx: mpsc::UnboundedReceiver<HubFrame>) {
    while let Some(frame) = rx.recv().await {
        let bytes = match hub::encode(&frame) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode hub frame");
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::Binary(bytes.into())).await {
            tracing::warn!(err = %e, "hub write failed");
            break;
        }
    }
    let _ = ws_sender.close().await;
    tracing::debug!("hub writer task exiting");
}

/// Reads frames from the hub and dispatches them.
///
/// Malformed frames are logged and skipped. On exit the connection is marked
/// down and every local subscription sender is dropped, which ends the
/// subscriptions.
async fn reader_loop(mut ws_reader: WsReader, shared: Weak<HubShared>) {
    while let Some(msg_result) = ws_reader.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match msg_result {
            Ok(Message::Binary(data)) => match hub::decode(&data) {
                Ok(frame) => dispatch_frame(&shared, frame),
                Err(e) => tracing::warn!(err = %e, "malformed hub frame, skipping"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!("hub WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ping/pong/text frames carry nothing for us.
            }
            Err(e) => {
                tracing::warn!(err = %e, "hub WebSocket read error");
                break;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.connected.store(false, Ordering::Release);
        shared.subscriptions.lock().clear();
        shared.members.write().clear();
    }
    tracing::info!("hub reader task exiting");
}

fn dispatch_frame(shared: &HubShared, frame: HubFrame) {
    match frame {
        HubFrame::Deliver {
            topic,
            from,
            payload,
        } => {
            let subs = shared.subscriptions.lock();
            let Some(local) = subs.get(&topic) else {
                tracing::debug!(topic = %topic, "delivery for topic without subscriptions");
                return;
            };
            let from = PeerId::new(from);
            for tx in local.values() {
                let _ = tx.send(RawMessage {
                    from: from.clone(),
                    data: payload.clone(),
                });
            }
        }
        HubFrame::Members { topic, peers } => {
            // Merged rather than replaced: a PeerJoined can overtake the snapshot.
            shared
                .members
                .write()
                .entry(topic)
                .or_default()
                .extend(peers.into_iter().map(PeerId::new));
        }
        HubFrame::PeerJoined { topic, peer_id } => {
            tracing::debug!(topic = %topic, peer_id = %peer_id, "peer joined topic");
            shared
                .members
                .write()
                .entry(topic)
                .or_default()
                .insert(PeerId::new(peer_id));
        }
        HubFrame::PeerLeft { topic, peer_id } => {
            tracing::debug!(topic = %topic, peer_id = %peer_id, "peer left topic");
            if let Some(peers) = shared.members.write().get_mut(&topic) {
                peers.remove(&PeerId::new(peer_id));
            }
        }
        HubFrame::Error { reason } => {
            tracing::warn!(reason = %reason, "hub reported error");
        }
        other => {
            tracing::debug!(?other, "unexpected hub frame");
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Protocol(format!(
            "hub HTTP error: status {}",
            response.status()
        )),
        other => TransportError::Io(std::io::Error::other(format!(
            "hub connection error: {other}"
        ))),
    }
}
