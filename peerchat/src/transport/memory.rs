//! In-process publish/subscribe network.
//!
//! A [`MemoryNetwork`] is a cloneable bus shared by any number of
//! [`MemoryHost`]s. Publishing on a topic delivers the payload to every open
//! subscription on that topic, the publisher's own included, in publish
//! order. Used by tests and by the client's offline mode.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{PeerId, PubSub, PubSubTopic, RawMessage, Subscription, TransportError};

/// Subscription id, unique within one network.
type SubId = u64;

struct Subscriber {
    peer: PeerId,
    tx: mpsc::UnboundedSender<RawMessage>,
}

#[derive(Default)]
struct NetworkState {
    /// Open subscriptions per topic.
    topics: HashMap<String, HashMap<SubId, Subscriber>>,
    /// `(peer, topic)` pairs with a live topic handle.
    joined: HashSet<(PeerId, String)>,
    next_sub_id: SubId,
}

/// Shared in-process bus.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    max_payload_size: Option<usize>,
}

impl MemoryNetwork {
    /// Creates an empty network with no payload size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects publications larger than `max` bytes with
    /// [`TransportError::PayloadTooLarge`].
    #[must_use]
    pub const fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = Some(max);
        self
    }

    /// Attaches a host with the given identity.
    #[must_use]
    pub fn host(&self, peer_id: PeerId) -> MemoryHost {
        MemoryHost {
            local_id: peer_id,
            network: self.clone(),
        }
    }

    /// Terminates every subscription on `topic`.
    ///
    /// Payloads already queued are still delivered; after that each
    /// subscription's `next` returns [`TransportError::ConnectionClosed`].
    /// Returns the number of subscriptions terminated.
    pub fn close_topic(&self, topic: &str) -> usize {
        let removed = self.state.lock().topics.remove(topic);
        let count = removed.map_or(0, |subs| subs.len());
        tracing::debug!(topic, count, "memory topic closed");
        count
    }

    /// Number of open subscriptions on `topic`.
    #[must_use]
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.state.lock().topics.get(topic).map_or(0, HashMap::len)
    }

    fn register(&self, topic: &str, peer: PeerId, tx: mpsc::UnboundedSender<RawMessage>) -> SubId {
        let mut state = self.state.lock();
        let id = state.next_sub_id;
        state.next_sub_id += 1;
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id, Subscriber { peer, tx });
        id
    }

    fn unregister(&self, topic: &str, id: SubId) {
        let mut state = self.state.lock();
        if let Some(subs) = state.topics.get_mut(topic) {
            subs.remove(&id);
            if subs.is_empty() {
                state.topics.remove(topic);
            }
        }
    }

    fn senders(&self, topic: &str) -> Vec<mpsc::UnboundedSender<RawMessage>> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|subs| subs.values().map(|s| s.tx.clone()).collect())
            .unwrap_or_default()
    }

    fn peers(&self, topic: &str) -> BTreeSet<PeerId> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|subs| subs.values().map(|s| s.peer.clone()).collect())
            .unwrap_or_default()
    }
}

/// A host attached to a [`MemoryNetwork`].
pub struct MemoryHost {
    local_id: PeerId,
    network: MemoryNetwork,
}

impl PubSub for MemoryHost {
    type Topic = MemoryTopic;

    fn local_peer_id(&self) -> PeerId {
        self.local_id.clone()
    }

    async fn join(&self, topic: &str) -> Result<MemoryTopic, TransportError> {
        let key = (self.local_id.clone(), topic.to_string());
        if !self.network.state.lock().joined.insert(key) {
            return Err(TransportError::AlreadyJoined(topic.to_string()));
        }
        tracing::debug!(peer = %self.local_id, topic, "memory topic joined");
        Ok(MemoryTopic {
            name: topic.to_string(),
            local_id: self.local_id.clone(),
            network: self.network.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// Topic handle on a [`MemoryNetwork`].
pub struct MemoryTopic {
    name: String,
    local_id: PeerId,
    network: MemoryNetwork,
    closed: AtomicBool,
}

impl MemoryTopic {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::TopicClosed(self.name.clone()));
        }
        Ok(())
    }
}

impl PubSubTopic for MemoryTopic {
    type Subscription = MemorySubscription;

    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<MemorySubscription, TransportError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.network.register(&self.name, self.local_id.clone(), tx);
        Ok(MemorySubscription {
            id,
            topic: self.name.clone(),
            network: self.network.clone(),
            rx: AsyncMutex::new(rx),
            cancelled: CancellationToken::new(),
        })
    }

    async fn publish(&self, scope: &CancellationToken, data: Vec<u8>) -> Result<(), TransportError> {
        if scope.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.ensure_open()?;
        if let Some(max) = self.network.max_payload_size
            && data.len() > max
        {
            return Err(TransportError::PayloadTooLarge {
                size: data.len(),
                max,
            });
        }

        for tx in self.network.senders(&self.name) {
            // A receiver gone mid-publish is a subscription that just ended.
            let _ = tx.send(RawMessage {
                from: self.local_id.clone(),
                data: data.clone(),
            });
        }
        Ok(())
    }

    fn list_peers(&self) -> Vec<PeerId> {
        let mut peers = self.network.peers(&self.name);
        peers.remove(&self.local_id);
        peers.into_iter().collect()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::TopicClosed(self.name.clone()));
        }
        self.network
            .state
            .lock()
            .joined
            .remove(&(self.local_id.clone(), self.name.clone()));
        Ok(())
    }
}

impl Drop for MemoryTopic {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.network
                .state
                .lock()
                .joined
                .remove(&(self.local_id.clone(), self.name.clone()));
        }
    }
}

/// Subscription on a [`MemoryNetwork`] topic.
pub struct MemorySubscription {
    id: SubId,
    topic: String,
    network: MemoryNetwork,
    rx: AsyncMutex<mpsc::UnboundedReceiver<RawMessage>>,
    cancelled: CancellationToken,
}

impl Subscription for MemorySubscription {
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
        self.network.unregister(&self.topic, self.id);
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.network.unregister(&self.topic, self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const TOPIC: &str = "room-peerchat-test";

    async fn joined_pair() -> (MemoryNetwork, MemoryTopic, MemoryTopic) {
        let net = MemoryNetwork::new();
        let alice = net.host(PeerId::new("alice")).join(TOPIC).await.unwrap();
        let bob = net.host(PeerId::new("bob")).join(TOPIC).await.unwrap();
        (net, alice, bob)
    }

    #[tokio::test]
    async fn publish_reaches_other_subscriber() {
        let (_net, alice, bob) = joined_pair().await;
        let sub = bob.subscribe().await.unwrap();
        let scope = CancellationToken::new();

        alice.publish(&scope, b"hello".to_vec()).await.unwrap();

        let msg = sub.next(&scope).await.unwrap();
        assert_eq!(msg.from, PeerId::new("alice"));
        assert_eq!(msg.data, b"hello");
    }

    #[tokio::test]
    async fn publisher_receives_own_copy() {
        let (_net, alice, _bob) = joined_pair().await;
        let sub = alice.subscribe().await.unwrap();
        let scope = CancellationToken::new();

        alice.publish(&scope, b"echo".to_vec()).await.unwrap();

        let msg = sub.next(&scope).await.unwrap();
        assert_eq!(msg.from, PeerId::new("alice"));
    }

    #[tokio::test]
    async fn delivery_preserves_publish_order() {
        let (_net, alice, bob) = joined_pair().await;
        let sub = bob.subscribe().await.unwrap();
        let scope = CancellationToken::new();

        for i in 0u32..10 {
            alice.publish(&scope, i.to_le_bytes().to_vec()).await.unwrap();
        }
        for i in 0u32..10 {
            let msg = sub.next(&scope).await.unwrap();
            assert_eq!(msg.data, i.to_le_bytes());
        }
    }

    #[tokio::test]
    async fn list_peers_excludes_self_and_unsubscribed() {
        let (net, alice, bob) = joined_pair().await;
        assert!(alice.list_peers().is_empty());

        let _a = alice.subscribe().await.unwrap();
        let _b = bob.subscribe().await.unwrap();
        let carol = net.host(PeerId::new("carol")).join(TOPIC).await.unwrap();
        let _c = carol.subscribe().await.unwrap();

        assert_eq!(
            alice.list_peers(),
            vec![PeerId::new("bob"), PeerId::new("carol")]
        );
    }

    #[tokio::test]
    async fn cancelled_subscription_leaves_membership() {
        let (_net, alice, bob) = joined_pair().await;
        let sub = bob.subscribe().await.unwrap();
        assert_eq!(alice.list_peers(), vec![PeerId::new("bob")]);

        sub.cancel();
        assert!(alice.list_peers().is_empty());

        let scope = CancellationToken::new();
        let result = sub.next(&scope).await;
        assert!(matches!(result, Err(TransportError::SubscriptionCancelled)));
    }

    #[tokio::test]
    async fn next_returns_cancelled_when_scope_cancelled() {
        let (_net, _alice, bob) = joined_pair().await;
        let sub = bob.subscribe().await.unwrap();
        let scope = CancellationToken::new();

        let waiter = {
            let scope = scope.clone();
            tokio::spawn(async move { sub.next(&scope).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn close_topic_terminates_subscriptions() {
        let (net, _alice, bob) = joined_pair().await;
        let sub = bob.subscribe().await.unwrap();

        assert_eq!(net.close_topic(TOPIC), 1);

        let scope = CancellationToken::new();
        let result = sub.next(&scope).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let (_net, alice, _bob) = joined_pair().await;
        alice.close().await.unwrap();

        let scope = CancellationToken::new();
        let result = alice.publish(&scope, b"late".to_vec()).await;
        assert!(matches!(result, Err(TransportError::TopicClosed(_))));
    }

    #[tokio::test]
    async fn publish_with_cancelled_scope_fails() {
        let (_net, alice, _bob) = joined_pair().await;
        let scope = CancellationToken::new();
        scope.cancel();

        let result = alice.publish(&scope, b"x".to_vec()).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let net = MemoryNetwork::new().with_max_payload_size(4);
        let topic = net.host(PeerId::new("alice")).join(TOPIC).await.unwrap();
        let scope = CancellationToken::new();

        let result = topic.publish(&scope, vec![0; 5]).await;
        assert!(matches!(
            result,
            Err(TransportError::PayloadTooLarge { size: 5, max: 4 })
        ));
        assert!(topic.publish(&scope, vec![0; 4]).await.is_ok());
    }

    #[tokio::test]
    async fn joining_twice_is_rejected_until_closed() {
        let net = MemoryNetwork::new();
        let host = net.host(PeerId::new("alice"));
        let topic = host.join(TOPIC).await.unwrap();

        assert!(matches!(
            host.join(TOPIC).await,
            Err(TransportError::AlreadyJoined(_))
        ));

        topic.close().await.unwrap();
        assert!(host.join(TOPIC).await.is_ok());
    }
}
