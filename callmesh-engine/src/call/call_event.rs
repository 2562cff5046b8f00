use crate::call::call_state::{CallState, IncomingCall};
use crate::media::{LocalStream, RemoteStream};
use crate::transport::LinkHealth;
use callmesh_core::{ParticipantId, RoomId, SignalKind};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, watch};

/// Why an inbound signaling message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Retransmission of an invitation that was already handled.
    DuplicateInvite,
    /// The message belongs to a room we are not in.
    ForeignRoom,
    /// No call is active.
    NoSession,
    /// An answer arrived while not waiting for one.
    NotAwaitingAnswer,
    /// The message kind requires a payload it does not carry.
    MissingPayload,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::DuplicateInvite => "duplicate_invite",
            DropReason::ForeignRoom => "foreign_room",
            DropReason::NoSession => "no_session",
            DropReason::NotAwaitingAnswer => "not_awaiting_answer",
            DropReason::MissingPayload => "missing_payload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteEnded,
    Rejected,
    Busy,
    RingTimeout,
    ConnectTimeout,
    /// Every link failed and nobody is left to wait for.
    PeersLost,
    IdentityChanged,
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::LocalHangup => "local_hangup",
            EndReason::RemoteEnded => "remote_ended",
            EndReason::Rejected => "rejected",
            EndReason::Busy => "busy",
            EndReason::RingTimeout => "ring_timeout",
            EndReason::ConnectTimeout => "connect_timeout",
            EndReason::PeersLost => "peers_lost",
            EndReason::IdentityChanged => "identity_changed",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Structured notifications from the engine, mirroring its log events.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged {
        room_id: Option<RoomId>,
        from: CallState,
        to: CallState,
    },
    IncomingCall(IncomingCall),
    /// A pending invitation was not answered in time.
    IncomingCallExpired {
        room_id: RoomId,
    },
    InviteSent {
        room_id: RoomId,
        target: ParticipantId,
        attempt: u32,
    },
    /// We answered an invitation with `call-busy`.
    BusySent {
        room_id: RoomId,
        to: ParticipantId,
    },
    PeerHealthChanged {
        peer_id: ParticipantId,
        health: LinkHealth,
    },
    GlareResolved {
        peer_id: ParticipantId,
        kept_local_offer: bool,
    },
    SignalDropped {
        kind: SignalKind,
        from: ParticipantId,
        reason: DropReason,
    },
    CallEnded {
        room_id: RoomId,
        reason: EndReason,
    },
}

/// What the application sees of the engine at any moment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSnapshot {
    pub local_id: Option<ParticipantId>,
    pub state: CallState,
    pub room_id: Option<RoomId>,
    pub participants: Vec<ParticipantId>,
    pub is_video: bool,
    pub local_stream: Option<LocalStream>,
    pub remote_streams: BTreeMap<ParticipantId, RemoteStream>,
    pub peer_health: BTreeMap<ParticipantId, LinkHealth>,
    pub incoming: Option<IncomingCall>,
    pub muted: bool,
    pub camera_off: bool,
    pub screen_sharing: bool,
}

/// Fan-out of engine output: a lossy event stream plus the latest snapshot.
#[derive(Clone)]
pub(crate) struct EventBus {
    pub(crate) events: broadcast::Sender<CallEvent>,
    pub(crate) snapshot: watch::Sender<CallSnapshot>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (snapshot, _) = watch::channel(CallSnapshot::default());
        Self { events, snapshot }
    }

    pub(crate) fn emit(&self, event: CallEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn publish(&self, next: CallSnapshot) {
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
