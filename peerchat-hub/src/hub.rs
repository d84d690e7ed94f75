//! Hub server core: shared state, WebSocket handler, topic membership and
//! fan-out.
//!
//! Peers connect over WebSocket, identify themselves with `Hello`, and then
//! subscribe to and publish on named topics. Every published payload is
//! delivered to every subscriber of its topic, the publisher included, with
//! `from` set to the publisher's registered id. Payloads are never inspected.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use peerchat_proto::hub::{self, HubFrame};
use tokio::sync::{RwLock, mpsc};

/// Default maximum allowed payload size in bytes (64 KB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

type ConnSender = mpsc::UnboundedSender<Message>;

/// Shared hub state: the peer registry and topic membership.
pub struct HubState {
    /// Maps peer id to the channel feeding that peer's WebSocket writer.
    connections: RwLock<HashMap<String, ConnSender>>,
    /// Maps topic name to the ids of its subscribers.
    topics: RwLock<HashMap<String, BTreeSet<String>>>,
    /// Maximum allowed payload size in bytes.
    max_payload_size: usize,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    /// Creates an empty hub state with the default payload size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload_size(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Creates an empty hub state with a custom payload size limit.
    #[must_use]
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            max_payload_size,
        }
    }

    /// Registers a peer, returning the sender of the connection it replaced.
    pub async fn register(&self, peer_id: &str, sender: ConnSender) -> Option<ConnSender> {
        self.connections
            .write()
            .await
            .insert(peer_id.to_string(), sender)
    }

    /// Removes a peer, but only if `sender` is still its registered
    /// connection. Returns whether the peer was removed.
    pub async fn unregister_if_current(&self, peer_id: &str, sender: &ConnSender) -> bool {
        let mut conns = self.connections.write().await;
        if conns.get(peer_id).is_some_and(|s| s.same_channel(sender)) {
            conns.remove(peer_id);
            true
        } else {
            false
        }
    }

    /// Whether `sender` is the registered connection for `peer_id`.
    pub async fn is_current(&self, peer_id: &str, sender: &ConnSender) -> bool {
        self.connections
            .read()
            .await
            .get(peer_id)
            .is_some_and(|s| s.same_channel(sender))
    }

    /// Returns a clone of the sender for the given peer, if registered.
    pub async fn get_sender(&self, peer_id: &str) -> Option<ConnSender> {
        self.connections.read().await.get(peer_id).cloned()
    }

    /// Largest `Publish` payload forwarded, in bytes.
    #[must_use]
    pub const fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Number of registered peers.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Adds `peer_id` to `topic`.
    ///
    /// Returns the other subscribers if the peer was newly added, `None` if
    /// it was already subscribed.
    pub async fn subscribe(&self, topic: &str, peer_id: &str) -> Option<Vec<String>> {
        let mut topics = self.topics.write().await;
        let members = topics.entry(topic.to_string()).or_default();
        if !members.insert(peer_id.to_string()) {
            return None;
        }
        Some(members.iter().filter(|p| *p != peer_id).cloned().collect())
    }

    /// Removes `peer_id` from `topic`.
    ///
    /// Returns the remaining subscribers if the peer was a member.
    pub async fn unsubscribe(&self, topic: &str, peer_id: &str) -> Option<Vec<String>> {
        let mut topics = self.topics.write().await;
        let members = topics.get_mut(topic)?;
        if !members.remove(peer_id) {
            return None;
        }
        let remaining: Vec<String> = members.iter().cloned().collect();
        if members.is_empty() {
            topics.remove(topic);
        }
        Some(remaining)
    }

    /// Removes `peer_id` from every topic, returning each topic left with its
    /// remaining subscribers.
    pub async fn leave_all(&self, peer_id: &str) -> Vec<(String, Vec<String>)> {
        let mut topics = self.topics.write().await;
        let mut left = Vec::new();
        topics.retain(|topic, members| {
            if members.remove(peer_id) {
                left.push((topic.clone(), members.iter().cloned().collect()));
            }
            !members.is_empty()
        });
        left
    }

    /// Current subscribers of `topic`.
    pub async fn subscribers(&self, topic: &str) -> Vec<String> {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send a WebSocket Close frame to every connected peer.
    ///
    /// Each peer's writer task forwards the close frame, which ends the
    /// client's subscriptions. Useful for graceful shutdown and testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (peer_id, sender) in conns.iter() {
            tracing::info!(peer_id = %peer_id, "sending close frame to peer");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// The connection lifecycle:
/// 1. Wait for a `Hello` frame.
/// 2. Register the peer and reply `Welcome`.
/// 3. Process frames until either side hangs up.
/// 4. Leave every topic and unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(peer_id) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before hello");
        let reject = HubFrame::Error {
            reason: "expected a Hello frame with a non-empty peer id".to_string(),
        };
        let _ = send_frame_direct(&mut ws_sender, &reject).await;
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    if let Some(old) = state.register(&peer_id, tx.clone()).await {
        // Subscriptions of the old connection do not carry over.
        tracing::info!(peer_id = %peer_id, "replaced existing connection");
        let _ = old.send(Message::Close(None));
        leave_all_topics(&state, &peer_id).await;
    }

    let welcome = HubFrame::Welcome {
        peer_id: peer_id.clone(),
        max_payload_size: u64::try_from(state.max_payload_size).unwrap_or(u64::MAX),
    };
    if let Err(e) = send_frame_direct(&mut ws_sender, &welcome).await {
        tracing::error!(peer_id = %peer_id, error = %e, "failed to send Welcome");
        state.unregister_if_current(&peer_id, &tx).await;
        return;
    }

    tracing::info!(peer_id = %peer_id, "peer connected");

    let writer_peer_id = peer_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(peer_id = %writer_peer_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_peer_id = peer_id.clone();
    let reader_state = Arc::clone(&state);
    let reader_tx = tx.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    if !reader_state.is_current(&reader_peer_id, &reader_tx).await {
                        tracing::debug!(peer_id = %reader_peer_id, "dropping frame from replaced connection");
                        break;
                    }
                    handle_binary_message(&reader_peer_id, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(peer_id = %reader_peer_id, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    if state.unregister_if_current(&peer_id, &tx).await {
        leave_all_topics(&state, &peer_id).await;
        tracing::info!(peer_id = %peer_id, "peer disconnected");
    } else {
        tracing::debug!(peer_id = %peer_id, "replaced connection closed");
    }
}

/// Waits for the first binary frame, expecting a `Hello` with a non-empty id.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match hub::decode(&data) {
                Ok(HubFrame::Hello { peer_id }) => {
                    if peer_id.is_empty() {
                        tracing::warn!("received Hello with empty peer_id");
                        return None;
                    }
                    return Some(peer_id);
                }
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected Hello, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode hello frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles a binary WebSocket message from a registered peer.
async fn handle_binary_message(peer_id: &str, data: &[u8], state: &Arc<HubState>) {
    let frame = match hub::decode(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(peer_id = %peer_id, error = %e, "failed to decode frame");
            return;
        }
    };

    match frame {
        HubFrame::Subscribe { topic } => {
            let Some(others) = state.subscribe(&topic, peer_id).await else {
                tracing::debug!(peer_id = %peer_id, topic = %topic, "already subscribed");
                return;
            };
            tracing::info!(peer_id = %peer_id, topic = %topic, "subscribed");

            let members = HubFrame::Members {
                topic: topic.clone(),
                peers: others.clone(),
            };
            send_to_peer(state, peer_id, &members).await;

            let joined = HubFrame::PeerJoined {
                topic,
                peer_id: peer_id.to_string(),
            };
            broadcast(state, &others, &joined).await;
        }
        HubFrame::Unsubscribe { topic } => {
            let Some(remaining) = state.unsubscribe(&topic, peer_id).await else {
                tracing::debug!(peer_id = %peer_id, topic = %topic, "unsubscribe from unknown topic");
                return;
            };
            tracing::info!(peer_id = %peer_id, topic = %topic, "unsubscribed");

            let left = HubFrame::PeerLeft {
                topic,
                peer_id: peer_id.to_string(),
            };
            broadcast(state, &remaining, &left).await;
        }
        HubFrame::Publish { topic, payload } => {
            if payload.len() > state.max_payload_size {
                tracing::warn!(
                    peer_id = %peer_id,
                    size = payload.len(),
                    max = state.max_payload_size,
                    "payload exceeds size limit"
                );
                let err = HubFrame::Error {
                    reason: format!(
                        "payload too large: {} bytes (max {})",
                        payload.len(),
                        state.max_payload_size
                    ),
                };
                send_to_peer(state, peer_id, &err).await;
                return;
            }

            let subscribers = state.subscribers(&topic).await;
            tracing::debug!(
                from = %peer_id,
                topic = %topic,
                payload_len = payload.len(),
                subscribers = subscribers.len(),
                "fanning out payload"
            );

            let deliver = HubFrame::Deliver {
                topic,
                from: peer_id.to_string(),
                payload,
            };
            broadcast(state, &subscribers, &deliver).await;
        }
        HubFrame::Hello { peer_id: new_id } => {
            tracing::warn!(
                peer_id = %peer_id,
                new_id = %new_id,
                "received Hello from already-connected peer"
            );
        }
        other => {
            tracing::warn!(peer_id = %peer_id, frame = ?other, "unexpected frame from client");
        }
    }
}

/// Removes `peer_id` from every topic and tells the remaining subscribers.
async fn leave_all_topics(state: &Arc<HubState>, peer_id: &str) {
    for (topic, remaining) in state.leave_all(peer_id).await {
        tracing::debug!(peer_id = %peer_id, topic = %topic, "left topic");
        let left = HubFrame::PeerLeft {
            topic,
            peer_id: peer_id.to_string(),
        };
        broadcast(state, &remaining, &left).await;
    }
}

/// Sends one frame to each of `peers`, encoding it once.
async fn broadcast(state: &Arc<HubState>, peers: &[String], frame: &HubFrame) {
    if peers.is_empty() {
        return;
    }
    let bytes = match hub::encode(frame) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode frame");
            return;
        }
    };
    let conns = state.connections.read().await;
    for peer in peers {
        if let Some(sender) = conns.get(peer) {
            let _ = sender.send(Message::Binary(bytes.clone().into()));
        }
    }
}

/// Sends a frame to a registered peer via its channel.
async fn send_to_peer(state: &Arc<HubState>, peer_id: &str, frame: &HubFrame) {
    if let Some(sender) = state.get_sender(peer_id).await
        && let Ok(bytes) = hub::encode(frame)
    {
        let _ = sender.send(Message::Binary(bytes.into()));
    }
}

/// Encodes and sends a frame directly on a WebSocket sender.
async fn send_frame_direct(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &HubFrame,
) -> Result<(), String> {
    let bytes = hub::encode(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the hub on the given address and returns the bound address and a
/// join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Starts the hub with a pre-configured [`HubState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<HubState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
