use crate::error::RelayError;
use crate::signaling::relay::{BroadcastRelay, Subscription, SubscriptionKey};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace};

struct MemoryRelayInner {
    topics: DashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>,
    next_id: AtomicU64,
    /// Remaining publishes to silently drop, per topic.
    losses: DashMap<String, usize>,
    stall: AtomicBool,
    stalled: Mutex<Vec<oneshot::Sender<()>>>,
    tap: broadcast::Sender<(String, String)>,
}

/// In-process relay with the same delivery contract as the real one.
///
/// Shared by every engine in a process (clone it), which makes it the relay of
/// choice for tests and local demos. Supports dropping publishes and stalling
/// subscription confirmations to exercise the unreliable paths.
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<MemoryRelayInner>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(MemoryRelayInner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
                losses: DashMap::new(),
                stall: AtomicBool::new(false),
                stalled: Mutex::new(Vec::new()),
                tap,
            }),
        }
    }

    /// Observe every publish as `(topic, payload)`, including dropped ones.
    pub fn tap(&self) -> broadcast::Receiver<(String, String)> {
        self.inner.tap.subscribe()
    }

    /// Drops the next `count` publishes on `topic`.
    pub fn drop_next(&self, topic: &str, count: usize) {
        self.inner.losses.insert(topic.to_owned(), count);
    }

    /// While stalled, new subscriptions never report ready.
    pub fn stall_subscriptions(&self, stall: bool) {
        self.inner.stall.store(stall, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    fn take_loss(&self, topic: &str) -> bool {
        let Some(mut remaining) = self.inner.losses.get_mut(topic) else {
            return false;
        };
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastRelay for MemoryRelay {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, RelayError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        self.inner
            .topics
            .entry(topic.to_owned())
            .or_default()
            .push((id, tx));

        if self.inner.stall.load(Ordering::SeqCst) {
            if let Ok(mut stalled) = self.inner.stalled.lock() {
                stalled.push(ready_tx);
            }
        } else {
            let _ = ready_tx.send(());
        }

        debug!("Relay subscription {} on '{}'", id, topic);
        Ok(Subscription::new(
            SubscriptionKey {
                id,
                topic: topic.to_owned(),
            },
            ready_rx,
            rx,
        ))
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError> {
        let _ = self.inner.tap.send((topic.to_owned(), payload.clone()));

        if self.take_loss(topic) {
            trace!("Relay dropped a publish on '{}'", topic);
            return Ok(());
        }

        if let Some(mut subscribers) = self.inner.topics.get_mut(topic) {
            subscribers.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn unsubscribe(&self, key: &SubscriptionKey) {
        let now_empty = match self.inner.topics.get_mut(&key.topic) {
            Some(mut subscribers) => {
                subscribers.retain(|(id, _)| *id != key.id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.inner
                .topics
                .remove_if(&key.topic, |_, subscribers| subscribers.is_empty());
        }
        debug!("Relay subscription {} on '{}' cancelled", key.id, key.topic);
    }
}
