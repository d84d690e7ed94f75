// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the room relay on the in-process transport.
//!
//! These tests validate:
//! - Joining with empty names uses the default user and room
//! - Messages reach other relays in the same room with the sender's metadata
//! - A relay never sees its own messages on Inbound
//! - Malformed payloads produce one receive-error log and nothing else
//! - Subscription termination closes Inbound once with one terminal log
//! - Exit stops publishing

use std::time::Duration;

use peerchat::room::{LogPrefix, RelayConfig, RoomChannels, RoomRelay};
use peerchat::transport::memory::{MemoryHost, MemoryNetwork, MemoryTopic};
use peerchat::transport::{PeerId, PubSub, PubSubTopic, Subscription, TransportError};
use peerchat_proto::envelope::{self, ChatEnvelope};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const LOBBY: &str = "room-peerchat-lobby";

async fn join(host: &MemoryHost, user: &str, room: &str) -> (RoomRelay<MemoryTopic>, RoomChannels) {
    RoomRelay::join(host, user, room, &RelayConfig::default())
        .await
        .expect("join failed")
}

async fn recv<M>(rx: &mut mpsc::Receiver<M>) -> Option<M> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting on channel")
}

async fn assert_quiet<M: std::fmt::Debug>(rx: &mut mpsc::Receiver<M>) {
    let result = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(result.is_err(), "unexpected item: {result:?}");
}

#[tokio::test]
async fn newcomer_in_lobby_is_heard_by_peer() {
    let net = MemoryNetwork::new();
    let (newcomer, channels) = join(&net.host(PeerId::new("peer-i")), "", "lobby").await;
    let (_peer, mut peer_channels) = join(&net.host(PeerId::new("peer-j")), "jo", "lobby").await;

    assert_eq!(newcomer.user_name(), "newuser");
    assert_eq!(newcomer.topic_name(), LOBBY);

    channels.outbound.send("hi".to_string()).await.unwrap();

    let received = recv(&mut peer_channels.inbound).await.unwrap();
    assert_eq!(received, ChatEnvelope::new("hi", "peer-i", "newuser"));
}

#[tokio::test]
async fn empty_room_joins_default_room() {
    let net = MemoryNetwork::new();
    let (relay, _channels) = join(&net.host(PeerId::new("a")), "alice", "").await;

    assert_eq!(relay.room_name(), "lobby");
    assert_eq!(relay.user_name(), "alice");
    assert_eq!(net.subscription_count(LOBBY), 1);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let net = MemoryNetwork::new();
    let (_a, a_channels) = join(&net.host(PeerId::new("a")), "a", "one").await;
    let (_b, mut b_channels) = join(&net.host(PeerId::new("b")), "b", "two").await;

    a_channels.outbound.send("only for one".to_string()).await.unwrap();
    assert_quiet(&mut b_channels.inbound).await;
}

#[tokio::test]
async fn own_messages_never_reach_inbound() {
    let net = MemoryNetwork::new();
    let (_me, mut mine) = join(&net.host(PeerId::new("me")), "me", "lobby").await;
    let (_you, mut yours) = join(&net.host(PeerId::new("you")), "you", "lobby").await;

    for i in 0..5 {
        mine.outbound.send(format!("msg {i}")).await.unwrap();
    }
    for i in 0..5 {
        assert_eq!(recv(&mut yours.inbound).await.unwrap().message, format!("msg {i}"));
    }

    assert_quiet(&mut mine.inbound).await;
    assert_quiet(&mut mine.logs).await;
}

#[tokio::test]
async fn messages_keep_submission_order_and_content() {
    let net = MemoryNetwork::new();
    let (_a, a_channels) = join(&net.host(PeerId::new("a")), "ann", "lobby").await;
    let (_b, mut b_channels) = join(&net.host(PeerId::new("b")), "ben", "lobby").await;

    let messages = ["", "plain", "ünïcödé ✓", "{\"json\":\"inside\"}", "   "];
    for m in messages {
        a_channels.outbound.send(m.to_string()).await.unwrap();
    }
    for m in messages {
        let got = recv(&mut b_channels.inbound).await.unwrap();
        assert_eq!(got.message, m);
        assert_eq!(got.sender_id, "a");
        assert_eq!(got.sender_name, "ann");
    }
}

#[tokio::test]
async fn malformed_payload_yields_one_log_and_keeps_inbound_open() {
    let net = MemoryNetwork::new();
    let (_relay, mut channels) = join(&net.host(PeerId::new("r")), "r", "lobby").await;

    let rogue = net.host(PeerId::new("rogue")).join(LOBBY).await.unwrap();
    let scope = CancellationToken::new();
    rogue.publish(&scope, vec![0xff, 0x00, 0x13]).await.unwrap();

    let log = recv(&mut channels.logs).await.unwrap();
    assert_eq!(log.prefix, LogPrefix::SubError);
    assert_quiet(&mut channels.logs).await;

    // Inbound is still open and still delivering.
    let good = envelope::encode(&ChatEnvelope::new("fine", "rogue", "rogue")).unwrap();
    rogue.publish(&scope, good).await.unwrap();
    assert_eq!(recv(&mut channels.inbound).await.unwrap().message, "fine");
}

#[tokio::test]
async fn subscription_termination_is_reported_once() {
    let net = MemoryNetwork::new();
    let (relay, mut channels) = join(&net.host(PeerId::new("r")), "r", "lobby").await;

    assert_eq!(net.close_topic(LOBBY), 1);

    assert!(recv(&mut channels.inbound).await.is_none());
    let log = recv(&mut channels.logs).await.unwrap();
    assert_eq!(log.prefix, LogPrefix::SubClosed);
    assert_quiet(&mut channels.logs).await;

    // Inbound stays closed.
    assert!(channels.inbound.recv().await.is_none());

    // The relay itself is still usable.
    assert_eq!(relay.user_name(), "r");
    relay.exit().await;
}

#[tokio::test]
async fn exit_stops_publishing() {
    let net = MemoryNetwork::new();
    let (relay, channels) = join(&net.host(PeerId::new("leaver")), "l", "lobby").await;

    let observer = net.host(PeerId::new("observer")).join(LOBBY).await.unwrap();
    let sub = observer.subscribe().await.unwrap();
    let scope = CancellationToken::new();

    channels.outbound.send("before".to_string()).await.unwrap();
    let raw = tokio::time::timeout(Duration::from_secs(2), sub.next(&scope))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.from, PeerId::new("leaver"));

    relay.exit().await;

    // The publish loop is gone, so this either fails outright or is never
    // published.
    let _ = channels.outbound.send("after".to_string()).await;
    let after = tokio::time::timeout(Duration::from_millis(200), sub.next(&scope)).await;
    assert!(after.is_err(), "published after exit: {after:?}");
}

#[tokio::test]
async fn exit_unsubscribes_from_topic() {
    let net = MemoryNetwork::new();
    let (stayer, _s) = join(&net.host(PeerId::new("stayer")), "s", "lobby").await;
    let (leaver, _l) = join(&net.host(PeerId::new("leaver")), "l", "lobby").await;
    assert_eq!(stayer.peer_list(), vec![PeerId::new("leaver")]);

    leaver.exit().await;

    assert!(stayer.peer_list().is_empty());
    assert_eq!(net.subscription_count(LOBBY), 1);
}

#[tokio::test]
async fn join_failure_is_returned() {
    let net = MemoryNetwork::new();
    let host = net.host(PeerId::new("twice"));
    let (_first, _ch) = join(&host, "t", "lobby").await;

    let err = RoomRelay::join(&host, "t", "lobby", &RelayConfig::default())
        .await
        .err()
        .expect("second join should fail");
    assert!(err.to_string().contains(LOBBY), "got: {err}");
}

#[tokio::test]
async fn closed_topic_rejects_publish() {
    let net = MemoryNetwork::new();
    let topic = net.host(PeerId::new("p")).join("t").await.unwrap();
    topic.close().await.unwrap();

    let result = topic.publish(&CancellationToken::new(), b"x".to_vec()).await;
    assert!(matches!(result, Err(TransportError::TopicClosed(_))));
}
