// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for room relays talking through a live hub.
//!
//! Each test starts an in-process `peerchat-hub` on an OS-assigned port and
//! connects real WebSocket clients to it.

use std::sync::Arc;
use std::time::Duration;

use peerchat::room::{LogPrefix, RelayConfig, RoomChannels, RoomRelay};
use peerchat::transport::PeerId;
use peerchat::transport::hub::{HubClientConfig, HubHost, HubTopic};
use peerchat_hub::hub::{self, HubState};
use tokio::sync::mpsc;

async fn start_hub() -> (String, Arc<HubState>) {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start hub");
    (format!("ws://{addr}/ws"), state)
}

async fn connect(url: &str, id: &str) -> HubHost {
    HubHost::connect(url, PeerId::new(id), &HubClientConfig::default())
        .await
        .expect("hub connect failed")
}

async fn join(host: &HubHost, user: &str, room: &str) -> (RoomRelay<HubTopic>, RoomChannels) {
    RoomRelay::join(host, user, room, &RelayConfig::default())
        .await
        .expect("join failed")
}

async fn recv<M>(rx: &mut mpsc::Receiver<M>) -> Option<M> {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting on channel")
}

/// Polls `f` until it returns true or two seconds have passed.
async fn eventually(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn two_relays_chat_through_hub() {
    let (url, _state) = start_hub().await;
    let alice_host = connect(&url, "alice-id").await;
    let bob_host = connect(&url, "bob-id").await;

    let (alice, mut alice_ch) = join(&alice_host, "", "lobby").await;
    let (bob, mut bob_ch) = join(&bob_host, "bob", "lobby").await;
    assert!(eventually(|| alice.peer_list() == vec![PeerId::new("bob-id")]).await);

    alice_ch.outbound.send("hi".to_string()).await.unwrap();
    let got = recv(&mut bob_ch.inbound).await.unwrap();
    assert_eq!(got.message, "hi");
    assert_eq!(got.sender_id, "alice-id");
    assert_eq!(got.sender_name, "newuser");

    bob_ch.outbound.send("hello".to_string()).await.unwrap();
    // Alice's own "hi" also came back from the hub and was filtered.
    assert_eq!(recv(&mut alice_ch.inbound).await.unwrap().message, "hello");

    bob.exit().await;
    assert!(eventually(|| alice.peer_list().is_empty()).await);
    alice.exit().await;
}

#[tokio::test]
async fn rename_is_seen_by_peer() {
    let (url, _state) = start_hub().await;
    let a_host = connect(&url, "a").await;
    let b_host = connect(&url, "b").await;
    let (a, a_ch) = join(&a_host, "before", "r").await;
    let (b, mut b_ch) = join(&b_host, "b", "r").await;
    assert!(eventually(|| a.peer_list().len() == 1).await);

    a_ch.outbound.send("one".to_string()).await.unwrap();
    assert_eq!(recv(&mut b_ch.inbound).await.unwrap().sender_name, "before");

    a.update_user("after");
    a_ch.outbound.send("two".to_string()).await.unwrap();
    assert_eq!(recv(&mut b_ch.inbound).await.unwrap().sender_name, "after");

    a.exit().await;
    b.exit().await;
}

#[tokio::test]
async fn oversized_message_is_dropped_and_later_ones_flow() {
    let state = Arc::new(HubState::with_max_payload_size(256));
    let (addr, _handle) = hub::start_server_with_state("127.0.0.1:0", state)
        .await
        .unwrap();
    let url = format!("ws://{addr}/ws");
    let a_host = connect(&url, "a").await;
    let b_host = connect(&url, "b").await;
    let (a, mut a_ch) = join(&a_host, "a", "r").await;
    let (_b, mut b_ch) = join(&b_host, "b", "r").await;
    assert!(eventually(|| a.peer_list().len() == 1).await);

    a_ch.outbound.send("x".repeat(1024)).await.unwrap();
    let log = recv(&mut a_ch.logs).await.unwrap();
    assert_eq!(log.prefix, LogPrefix::PubError);

    a_ch.outbound.send("small".to_string()).await.unwrap();
    assert_eq!(recv(&mut b_ch.inbound).await.unwrap().message, "small");
}

#[tokio::test]
async fn hub_shutdown_closes_inbound() {
    let (url, state) = start_hub().await;
    let host = connect(&url, "solo").await;
    let (relay, mut channels) = join(&host, "solo", "lobby").await;

    state.close_all_connections().await;

    assert!(recv(&mut channels.inbound).await.is_none());
    let log = recv(&mut channels.logs).await.unwrap();
    assert_eq!(log.prefix, LogPrefix::SubClosed);
    assert!(eventually(|| !host.is_connected()).await);

    relay.exit().await;
}

#[tokio::test]
async fn connect_with_unreachable_hub_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = HubClientConfig {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(1),
    };
    let result = HubHost::connect(&format!("ws://{addr}/ws"), PeerId::new("x"), &config).await;
    assert!(result.is_err());
}
