use crate::error::RelayError;
use crate::signaling::relay::{BroadcastRelay, Subscription, SubscriptionKey};
use async_trait::async_trait;
use callmesh_core::RelayFrame;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct TopicState {
    subscribers: Vec<(u64, mpsc::UnboundedSender<String>)>,
    confirmed: bool,
    waiting: Vec<oneshot::Sender<()>>,
}

struct WsRelayInner {
    outbound: mpsc::UnboundedSender<RelayFrame>,
    topics: DashMap<String, TopicState>,
    next_id: AtomicU64,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for WsRelayInner {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Relay client speaking [`RelayFrame`]s over one websocket.
///
/// Several local subscriptions to the same topic share one relay
/// subscription; the topic is unsubscribed when the last local one goes.
#[derive(Clone)]
pub struct WsRelay {
    inner: Arc<WsRelayInner>,
}

impl WsRelay {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        info!("Connected to relay at {}", url);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RelayFrame>();

        let inner = Arc::new(WsRelayInner::new(outbound));

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize relay frame: {}", e);
                        continue;
                    }
                };
                if ws_write.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        let weak = Arc::downgrade(&inner);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<RelayFrame>(text.as_str()) {
                            Ok(frame) => inner.handle_frame(frame),
                            Err(e) => warn!("Invalid relay frame: {:?}", e),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Relay connection error: {}", e);
                        break;
                    }
                }
            }

            // Dropping the senders ends every local subscription stream.
            if let Some(inner) = weak.upgrade() {
                inner.topics.clear();
            }
            info!("Relay connection closed");
        });

        if let Ok(mut tasks) = inner.tasks.lock() {
            tasks.push(writer);
            tasks.push(reader);
        }

        Ok(Self { inner })
    }
}

impl WsRelayInner {
    fn new(outbound: mpsc::UnboundedSender<RelayFrame>) -> Self {
        Self {
            outbound,
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Drops local subscriber `id` of `topic`. Returns `true` when it was the
    /// last one and the topic entry is gone.
    fn forget(&self, topic: &str, id: u64) -> bool {
        if let Some(mut state) = self.topics.get_mut(topic) {
            state.subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
        self.topics
            .remove_if(topic, |_, state| state.subscribers.is_empty())
            .is_some()
    }

    fn handle_frame(&self, frame: RelayFrame) {
        match frame {
            RelayFrame::Subscribed { topic } => {
                if let Some(mut state) = self.topics.get_mut(&topic) {
                    state.confirmed = true;
                    for waiter in state.waiting.drain(..) {
                        let _ = waiter.send(());
                    }
                }
            }
            RelayFrame::Message { topic, payload } => {
                if let Some(mut state) = self.topics.get_mut(&topic) {
                    state
                        .subscribers
                        .retain(|(_, tx)| tx.send(payload.clone()).is_ok());
                }
            }
            RelayFrame::Error { reason } => warn!("Relay reported an error: {}", reason),
            other => debug!("Ignoring unexpected relay frame {:?}", other),
        }
    }
}

#[async_trait]
impl BroadcastRelay for WsRelay {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, RelayError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let first = {
            let mut state = self.inner.topics.entry(topic.to_owned()).or_default();
            let first = state.subscribers.is_empty() && !state.confirmed;
            state.subscribers.push((id, tx));
            if state.confirmed {
                let _ = ready_tx.send(());
            } else {
                state.waiting.push(ready_tx);
            }
            first
        };

        if first {
            let sent = self.inner.outbound.send(RelayFrame::Subscribe {
                topic: topic.to_owned(),
            });
            if sent.is_err() {
                self.inner.forget(topic, id);
                return Err(RelayError::Closed);
            }
        }

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
        self.inner
            .outbound
            .send(RelayFrame::Publish {
                topic: topic.to_owned(),
                payload,
            })
            .map_err(|_| RelayError::Closed)
    }

    async fn unsubscribe(&self, key: &SubscriptionKey) {
        if self.inner.forget(&key.topic, key.id) {
            let _ = self.inner.outbound.send(RelayFrame::Unsubscribe {
                topic: key.topic.clone(),
            });
        }
    }
}
