use async_trait::async_trait;
use callmesh_core::{IceCandidate, ParticipantId, SessionDescription};
use callmesh_engine::SignalingOutput;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone, PartialEq)]
pub enum SignalMessage {
    Offer {
        peer_id: ParticipantId,
        sdp: SessionDescription,
    },
    Answer {
        peer_id: ParticipantId,
        sdp: SessionDescription,
    },
    Ice {
        peer_id: ParticipantId,
        candidate: IceCandidate,
    },
}

/// Mock SignalingOutput that captures all outgoing signals.
#[derive(Clone)]
pub struct MockSignalingOutput {
    tx: mpsc::UnboundedSender<SignalMessage>,
    signals: Arc<Mutex<Vec<SignalMessage>>>,
}

impl MockSignalingOutput {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let signaling = Self {
            tx,
            signals: Arc::new(Mutex::new(Vec::new())),
        };
        (signaling, rx)
    }

    pub async fn get_offer_for(&self, peer_id: &ParticipantId) -> Option<SessionDescription> {
        self.signals.lock().await.iter().find_map(|s| match s {
            SignalMessage::Offer { peer_id: id, sdp } if id == peer_id => Some(sdp.clone()),
            _ => None,
        })
    }

    pub async fn get_answer_for(&self, peer_id: &ParticipantId) -> Option<SessionDescription> {
        self.signals.lock().await.iter().find_map(|s| match s {
            SignalMessage::Answer { peer_id: id, sdp } if id == peer_id => Some(sdp.clone()),
            _ => None,
        })
    }

    pub async fn count_offers(&self) -> usize {
        self.signals
            .lock()
            .await
            .iter()
            .filter(|s| matches!(s, SignalMessage::Offer { .. }))
            .count()
    }
}

#[async_trait]
impl SignalingOutput for MockSignalingOutput {
    async fn send_offer(&self, peer_id: ParticipantId, sdp: SessionDescription) {
        tracing::debug!("[MockSignaling] send_offer to {}", peer_id);
        let msg = SignalMessage::Offer { peer_id, sdp };
        self.signals.lock().await.push(msg.clone());
        let _ = self.tx.send(msg);
    }

    async fn send_answer(&self, peer_id: ParticipantId, sdp: SessionDescription) {
        tracing::debug!("[MockSignaling] send_answer to {}", peer_id);
        let msg = SignalMessage::Answer { peer_id, sdp };
        self.signals.lock().await.push(msg.clone());
        let _ = self.tx.send(msg);
    }

    async fn send_ice(&self, peer_id: ParticipantId, candidate: IceCandidate) {
        tracing::debug!("[MockSignaling] send_ice to {}", peer_id);
        let msg = SignalMessage::Ice { peer_id, candidate };
        self.signals.lock().await.push(msg.clone());
        let _ = self.tx.send(msg);
    }
}
