//! The two background tasks of a [`RoomRelay`](super::RoomRelay).

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use peerchat_proto::envelope::{self, ChatEnvelope};

use super::{LogEvent, LogPrefix};
use crate::transport::{PeerId, PubSubTopic, Subscription, TransportError};

/// State owned by the publish loop.
pub(super) struct PublishLoop<T> {
    pub topic: Arc<T>,
    pub scope: CancellationToken,
    pub self_id: PeerId,
    pub user_name: Arc<RwLock<String>>,
    pub outbound: mpsc::Receiver<String>,
    pub logs: mpsc::Sender<LogEvent>,
}

/// State owned by the subscribe loop.
pub(super) struct SubscribeLoop<S> {
    pub subscription: Arc<S>,
    pub scope: CancellationToken,
    pub self_id: PeerId,
    pub inbound: mpsc::Sender<ChatEnvelope>,
    pub logs: mpsc::Sender<LogEvent>,
}

/// Wraps each outbound string in an envelope and publishes it.
///
/// Failures for one message are reported and the loop moves on to the next.
pub(super) async fn publish_loop<T: PubSubTopic>(ctx: PublishLoop<T>) {
    let PublishLoop {
        topic,
        scope,
        self_id,
        user_name,
        mut outbound,
        logs,
    } = ctx;

    loop {
        let next = tokio::select! {
            biased;
            () = scope.cancelled() => break,
            next = outbound.recv() => next,
        };

        let Some(message) = next else {
            // Every outbound sender is gone. Nothing more can be published.
            debug!("outbound channel closed, waiting for exit");
            scope.cancelled().await;
            break;
        };

        let envelope = ChatEnvelope {
            message,
            sender_id: self_id.to_string(),
            sender_name: user_name.read().clone(),
        };

        let bytes = match envelope::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode chat envelope");
                report(
                    &logs,
                    &scope,
                    LogEvent::new(LogPrefix::PubError, "could not encode chat envelope"),
                )
                .await;
                continue;
            }
        };

        if let Err(e) = topic.publish(&scope, bytes).await {
            if scope.is_cancelled() {
                break;
            }
            warn!(topic = %topic.name(), error = %e, "failed to publish");
            report(
                &logs,
                &scope,
                LogEvent::new(LogPrefix::PubError, "could not publish to topic"),
            )
            .await;
        }
    }

    debug!("publish loop stopped");
}

/// Decodes every payload from the subscription and forwards other peers'
/// messages to the inbound channel.
///
/// When the subscription terminates on its own, the inbound sender is
/// dropped (so the receiver sees the channel close) and a single
/// [`LogPrefix::SubClosed`] event is reported.
pub(super) async fn subscribe_loop<S: Subscription>(ctx: SubscribeLoop<S>) {
    let SubscribeLoop {
        subscription,
        scope,
        self_id,
        inbound,
        logs,
    } = ctx;

    loop {
        if scope.is_cancelled() {
            break;
        }

        let raw = match subscription.next(&scope).await {
            Ok(raw) => raw,
            Err(TransportError::Cancelled | TransportError::SubscriptionCancelled) => break,
            Err(_) if scope.is_cancelled() => break,
            Err(e) => {
                drop(inbound);
                warn!(error = %e, "subscription terminated");
                report(
                    &logs,
                    &scope,
                    LogEvent::new(LogPrefix::SubClosed, "subscription has closed"),
                )
                .await;
                debug!("subscribe loop stopped");
                return;
            }
        };

        if raw.from == self_id {
            trace!("discarding own message");
            continue;
        }

        let envelope = match envelope::decode(&raw.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(from = %raw.from, error = %e, "failed to decode chat envelope");
                report(
                    &logs,
                    &scope,
                    LogEvent::new(LogPrefix::SubError, "could not decode chat envelope"),
                )
                .await;
                continue;
            }
        };

        tokio::select! {
            biased;
            () = scope.cancelled() => break,
            sent = inbound.send(envelope) => {
                if sent.is_err() {
                    trace!("inbound receiver dropped, discarding message");
                }
            }
        }
    }

    debug!("subscribe loop stopped");
}

/// Sends a log event unless the scope is cancelled first.
async fn report(logs: &mpsc::Sender<LogEvent>, scope: &CancellationToken, event: LogEvent) {
    tokio::select! {
        biased;
        () = scope.cancelled() => {}
        sent = logs.send(event) => {
            if sent.is_err() {
                trace!("log receiver dropped");
            }
        }
    }
}
