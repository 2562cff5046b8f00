use crate::transport::{LinkHealth, LinkKey, NegotiationState, PeerConnection};
use callmesh_core::ParticipantId;
use std::sync::Arc;

/// One negotiated connection to a remote participant of the current room.
pub struct PeerLink {
    pub(crate) key: LinkKey,
    pub(crate) connection: Arc<dyn PeerConnection>,
    pub(crate) offer_sent: bool,
    pub(crate) remote_description_set: bool,
    pub(crate) health: LinkHealth,
}

impl PeerLink {
    pub(crate) fn new(key: LinkKey, connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            key,
            connection,
            offer_sent: false,
            remote_description_set: false,
            health: LinkHealth::New,
        }
    }

    pub fn peer_id(&self) -> &ParticipantId {
        &self.key.peer_id
    }

    pub fn key(&self) -> &LinkKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.key.generation
    }

    pub fn health(&self) -> LinkHealth {
        self.health
    }

    pub fn offer_sent(&self) -> bool {
        self.offer_sent
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.connection.negotiation_state()
    }

    /// A link is reusable until its connection fails or closes.
    pub fn is_usable(&self) -> bool {
        !self.health.is_terminal() && self.negotiation_state() != NegotiationState::Closed
    }
}
