use callmesh_core::{CallerProfile, ParticipantId, RoomId};
use std::collections::BTreeSet;
use tokio::time::Instant;

/// Call-level state. `Ended` is transient: teardown passes through it and
/// settles in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallState {
    #[default]
    Idle,
    Ringing,
    Connecting,
    Connected,
    Ended,
}

impl CallState {
    /// Forward-only transitions. There is no way back to `Ringing` or
    /// `Connecting` once connected.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, Ringing)
                | (Idle, Connecting)
                | (Ringing, Connecting)
                | (Ringing, Connected)
                | (Connecting, Connected)
                | (Ringing | Connecting | Connected, Ended)
                | (Ended, Idle)
        )
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        }
    }
}

/// One call attempt, from initiate/accept to teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    pub room_id: RoomId,
    pub initiator_id: ParticipantId,
    /// Every intended participant of the mesh, including ourselves.
    pub participant_ids: BTreeSet<ParticipantId>,
    pub is_video: bool,
    pub state: CallState,
}

impl CallSession {
    pub fn new(
        room_id: RoomId,
        initiator_id: ParticipantId,
        participant_ids: BTreeSet<ParticipantId>,
        is_video: bool,
    ) -> Self {
        Self {
            room_id,
            initiator_id,
            participant_ids,
            is_video,
            state: CallState::Idle,
        }
    }

    /// Participants other than `local_id`.
    pub fn remote_participants(&self, local_id: &ParticipantId) -> Vec<ParticipantId> {
        self.participant_ids
            .iter()
            .filter(|id| *id != local_id)
            .cloned()
            .collect()
    }
}

/// An invitation waiting for `accept_call` or `reject_call`.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    pub room_id: RoomId,
    pub from: ParticipantId,
    pub participants: Vec<ParticipantId>,
    pub is_video: bool,
    pub caller: Option<CallerProfile>,
    pub received_at: Instant,
}
