use crate::error::RelayError;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Identifies one subscription so it can be cancelled later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub id: u64,
    pub topic: String,
}

/// A live subscription to a relay topic.
///
/// Messages may be delivered before [`Subscription::ready`] resolves, but the
/// relay only guarantees fan-out to the subscriber once it has confirmed.
pub struct Subscription {
    key: SubscriptionKey,
    ready: Option<oneshot::Receiver<()>>,
    messages: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(
        key: SubscriptionKey,
        ready: oneshot::Receiver<()>,
        messages: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            key,
            ready: Some(ready),
            messages,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Waits for the relay's "subscribed" confirmation.
    pub async fn ready(&mut self) -> Result<(), RelayError> {
        match self.ready.take() {
            Some(rx) => rx.await.map_err(|_| RelayError::Closed),
            None => Ok(()),
        }
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.messages.recv().await
    }
}

/// The external publish/subscribe relay.
///
/// Delivery is at-most-once and best effort: no ordering across bursts, no
/// persistence, no acknowledgement.
#[async_trait]
pub trait BroadcastRelay: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, RelayError>;

    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError>;

    async fn unsubscribe(&self, key: &SubscriptionKey);
}
