use crate::media::RemoteTrack;
use callmesh_core::{IceCandidate, ParticipantId, RoomId};
use std::fmt;

/// Connection health of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkHealth {
    New,
    Checking,
    Connected,
    /// Transient; the backend may still recover.
    Disconnected,
    Failed,
    Closed,
}

impl LinkHealth {
    /// Terminal states remove the link.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkHealth::Failed | LinkHealth::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkHealth::New => "new",
            LinkHealth::Checking => "checking",
            LinkHealth::Connected => "connected",
            LinkHealth::Disconnected => "disconnected",
            LinkHealth::Failed => "failed",
            LinkHealth::Closed => "closed",
        }
    }
}

/// Identity of one connection instance. A peer that is re-linked gets a new
/// generation, so events still in flight from the old connection can be told
/// apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub peer_id: ParticipantId,
    pub room_id: RoomId,
    pub generation: u64,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.peer_id, self.room_id, self.generation)
    }
}

/// Events a connection reports back to the engine loop.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A local candidate was gathered and must be trickled to the peer.
    CandidateGenerated(LinkKey, IceCandidate),

    HealthChanged(LinkKey, LinkHealth),

    /// The peer started sending a track.
    RemoteTrack(LinkKey, RemoteTrack),
}

impl LinkEvent {
    pub fn key(&self) -> &LinkKey {
        match self {
            LinkEvent::CandidateGenerated(key, _)
            | LinkEvent::HealthChanged(key, _)
            | LinkEvent::RemoteTrack(key, _) => key,
        }
    }
}
