use crate::error::CallError;
use crate::signaling::relay::{BroadcastRelay, SubscriptionKey};
use callmesh_core::{ParticipantId, SignalingMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// An open topic: the relay subscription plus the task decoding its traffic.
pub struct TopicHandle {
    key: SubscriptionKey,
    forwarder: JoinHandle<()>,
}

impl TopicHandle {
    pub fn topic(&self) -> &str {
        &self.key.topic
    }
}

/// Typed signaling on top of the broadcast relay.
///
/// Inbound payloads are decoded and filtered to the ones addressed to the
/// local participant. Outbound messages go through a single publisher task,
/// so sends never block the caller and keep their relative order. The
/// publisher drains what is queued even after the transport is dropped.
pub struct SignalingTransport {
    relay: Arc<dyn BroadcastRelay>,
    local_id: ParticipantId,
    subscribe_timeout: Duration,
    outbound: mpsc::UnboundedSender<(String, String)>,
}

impl SignalingTransport {
    pub fn new(
        relay: Arc<dyn BroadcastRelay>,
        local_id: ParticipantId,
        subscribe_timeout: Duration,
    ) -> Self {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<(String, String)>();

        tokio::spawn({
            let relay = relay.clone();
            async move {
                while let Some((topic, payload)) = outbound_rx.recv().await {
                    if let Err(e) = relay.publish(&topic, payload).await {
                        warn!("Failed to publish on '{}': {}", topic, e);
                    }
                }
            }
        });

        Self {
            relay,
            local_id,
            subscribe_timeout,
            outbound,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Subscribes to `topic` and waits (bounded) for the relay to confirm.
    /// Decoded messages addressed to the local participant go to `sink`.
    pub async fn open(
        &self,
        topic: String,
        sink: mpsc::UnboundedSender<SignalingMessage>,
    ) -> Result<TopicHandle, CallError> {
        let mut subscription = self.relay.subscribe(&topic).await?;
        let key = subscription.key().clone();

        match tokio::time::timeout(self.subscribe_timeout, subscription.ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.relay.unsubscribe(&key).await;
                return Err(CallError::TransportUnavailable(format!(
                    "subscription to '{topic}' failed: {e}"
                )));
            }
            Err(_) => {
                self.relay.unsubscribe(&key).await;
                return Err(CallError::TransportUnavailable(format!(
                    "subscription to '{topic}' not ready after {:?}",
                    self.subscribe_timeout
                )));
            }
        }

        info!("Subscribed to '{}'", topic);

        let local_id = self.local_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(payload) = subscription.recv().await {
                let msg = match serde_json::from_str::<SignalingMessage>(&payload) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(event = "signal.dropped", reason = "malformed", "{}", e);
                        continue;
                    }
                };
                if !msg.is_addressed_to(&local_id) {
                    trace!(
                        event = "signal.dropped",
                        reason = "not_addressed",
                        kind = msg.kind.as_str(),
                        to = %msg.to
                    );
                    continue;
                }
                if sink.send(msg).is_err() {
                    break;
                }
            }
        });

        Ok(TopicHandle { key, forwarder })
    }

    pub async fn close(&self, handle: TopicHandle) {
        handle.forwarder.abort();
        self.relay.unsubscribe(&handle.key).await;
        info!("Unsubscribed from '{}'", handle.key.topic);
    }

    /// Queues `msg` for publication on `topic`. Never blocks; delivery is
    /// whatever the relay provides.
    pub fn send(&self, topic: &str, msg: &SignalingMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                trace!(kind = msg.kind.as_str(), to = %msg.to, "Publishing on '{}'", topic);
                if self.outbound.send((topic.to_owned(), json)).is_err() {
                    error!("Signaling publisher stopped; dropping {}", msg.kind.as_str());
                }
            }
            Err(e) => error!("Failed to serialize signaling message: {}", e),
        }
    }
}
