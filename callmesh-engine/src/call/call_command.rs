use crate::error::CallError;
use callmesh_core::{ParticipantId, RoomId};
use tokio::sync::oneshot;

type Reply<T> = oneshot::Sender<Result<T, CallError>>;

/// Requests from a [`crate::CallHandle`] to the engine loop.
#[derive(Debug)]
pub enum CallCommand {
    Initiate {
        targets: Vec<ParticipantId>,
        video: bool,
        reply: Reply<RoomId>,
    },
    Invite {
        targets: Vec<ParticipantId>,
        reply: Reply<()>,
    },
    Accept {
        reply: Reply<RoomId>,
    },
    Reject {
        reply: Reply<()>,
    },
    End {
        reply: Reply<()>,
    },
    ToggleMute {
        reply: Reply<bool>,
    },
    ToggleCamera {
        reply: Reply<bool>,
    },
    ToggleScreenShare {
        reply: Reply<bool>,
    },
    SwitchIdentity {
        local_id: ParticipantId,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}
