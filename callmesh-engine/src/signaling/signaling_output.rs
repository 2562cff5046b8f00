use crate::signaling::signaling_transport::SignalingTransport;
use async_trait::async_trait;
use callmesh_core::{
    IceCandidate, ParticipantId, RoomId, SessionDescription, SignalKind, SignalingMessage,
    room_topic,
};
use std::sync::Arc;

/// Outbound negotiation traffic of one room, as seen by the peer links.
#[async_trait]
pub trait SignalingOutput: Send + Sync {
    async fn send_offer(&self, peer_id: ParticipantId, sdp: SessionDescription);

    async fn send_answer(&self, peer_id: ParticipantId, sdp: SessionDescription);

    async fn send_ice(&self, peer_id: ParticipantId, candidate: IceCandidate);
}

/// Publishes negotiation messages on the room's `call-room-<id>` topic.
pub struct RoomSignaling {
    transport: Arc<SignalingTransport>,
    room_id: RoomId,
    topic: String,
}

impl RoomSignaling {
    pub fn new(transport: Arc<SignalingTransport>, room_id: RoomId) -> Self {
        let topic = room_topic(&room_id);
        Self {
            transport,
            room_id,
            topic,
        }
    }

    fn message(&self, kind: SignalKind, peer_id: ParticipantId) -> SignalingMessage {
        SignalingMessage::new(
            kind,
            self.transport.local_id().clone(),
            peer_id,
            self.room_id.clone(),
        )
    }
}

#[async_trait]
impl SignalingOutput for RoomSignaling {
    async fn send_offer(&self, peer_id: ParticipantId, sdp: SessionDescription) {
        let msg = self.message(SignalKind::Offer, peer_id).with_sdp(sdp);
        self.transport.send(&self.topic, &msg);
    }

    async fn send_answer(&self, peer_id: ParticipantId, sdp: SessionDescription) {
        let msg = self.message(SignalKind::Answer, peer_id).with_sdp(sdp);
        self.transport.send(&self.topic, &msg);
    }

    async fn send_ice(&self, peer_id: ParticipantId, candidate: IceCandidate) {
        let msg = self
            .message(SignalKind::IceCandidate, peer_id)
            .with_candidate(candidate);
        self.transport.send(&self.topic, &msg);
    }
}
