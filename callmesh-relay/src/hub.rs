use axum::extract::ws::Message;
use callmesh_core::RelayFrame;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

pub type ConnectionId = u64;

struct HubInner {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    topics: DashMap<String, HashSet<ConnectionId>>,
    next_id: AtomicU64,
}

/// Topic table shared by every websocket connection of the relay.
#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<HubInner>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                connections: DashMap::new(),
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn connect(&self, tx: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.connections.insert(id, tx);
        id
    }

    /// Forgets the connection and every subscription it held.
    pub fn disconnect(&self, id: ConnectionId) {
        self.inner.connections.remove(&id);
        self.inner.topics.retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn handle_frame(&self, id: ConnectionId, frame: RelayFrame) {
        match frame {
            RelayFrame::Subscribe { topic } => {
                self.inner
                    .topics
                    .entry(topic.clone())
                    .or_default()
                    .insert(id);
                debug!("Connection {} subscribed to '{}'", id, topic);
                self.send_frame(id, &RelayFrame::Subscribed { topic });
            }
            RelayFrame::Unsubscribe { topic } => {
                let now_empty = match self.inner.topics.get_mut(&topic) {
                    Some(mut subscribers) => {
                        subscribers.remove(&id);
                        subscribers.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.inner.topics.remove_if(&topic, |_, s| s.is_empty());
                }
                debug!("Connection {} unsubscribed from '{}'", id, topic);
            }
            RelayFrame::Publish { topic, payload } => {
                let delivered = self.publish(&topic, payload);
                trace!("Published on '{}' to {} subscriber(s)", topic, delivered);
            }
            other => {
                warn!("Connection {} sent a server frame: {:?}", id, other);
                self.send_frame(
                    id,
                    &RelayFrame::Error {
                        reason: "unexpected frame".into(),
                    },
                );
            }
        }
    }

    /// Fans `payload` out to the current subscribers of `topic`, publisher
    /// included. Returns how many connections it was handed to.
    pub fn publish(&self, topic: &str, payload: String) -> usize {
        let subscribers: Vec<ConnectionId> = match self.inner.topics.get(topic) {
            Some(subscribers) => subscribers.iter().copied().collect(),
            None => return 0,
        };

        let frame = RelayFrame::Message {
            topic: topic.to_owned(),
            payload,
        };
        subscribers
            .into_iter()
            .filter(|id| self.send_frame(*id, &frame))
            .count()
    }

    fn send_frame(&self, id: ConnectionId, frame: &RelayFrame) -> bool {
        let Some(connection) = self.inner.connections.get(&id) else {
            warn!("Attempted to send to disconnected connection {}", id);
            return false;
        };
        match serde_json::to_string(frame) {
            Ok(json) => {
                if let Err(e) = connection.send(Message::Text(json.into())) {
                    error!("Failed to send WS message to {}: {:?}", id, e);
                    return false;
                }
                true
            }
            Err(e) => {
                error!("Failed to serialize relay frame: {}", e);
                false
            }
        }
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}
