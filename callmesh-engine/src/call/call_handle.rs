use crate::call::call_command::CallCommand;
use crate::call::call_event::{CallEvent, CallSnapshot};
use crate::call::call_state::CallState;
use crate::error::CallError;
use callmesh_core::{ParticipantId, RoomId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Application-facing handle to a running [`crate::CallEngine`]. Cheap to
/// clone; the engine shuts down when the last handle is dropped.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<CallCommand>,
    snapshot: watch::Receiver<CallSnapshot>,
    events: broadcast::Sender<CallEvent>,
}

impl CallHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<CallCommand>,
        snapshot: watch::Receiver<CallSnapshot>,
        events: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            commands,
            snapshot,
            events,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, CallError>>) -> CallCommand,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| CallError::EngineStopped)?;
        rx.await.map_err(|_| CallError::EngineStopped)?
    }

    /// Starts a call to `targets`. Fails without side effects when media or
    /// the room topic cannot be acquired.
    pub async fn initiate_call(
        &self,
        targets: Vec<ParticipantId>,
        video: bool,
    ) -> Result<RoomId, CallError> {
        self.request(|reply| CallCommand::Initiate {
            targets,
            video,
            reply,
        })
        .await
    }

    /// Invites more participants into the current call.
    pub async fn invite_participants(&self, targets: Vec<ParticipantId>) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Invite { targets, reply })
            .await
    }

    pub async fn accept_call(&self) -> Result<RoomId, CallError> {
        self.request(|reply| CallCommand::Accept { reply }).await
    }

    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Reject { reply }).await
    }

    /// Hangs up. Calling it without an active call does nothing.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::End { reply }).await
    }

    /// Returns `true` when the microphone is now muted.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| CallCommand::ToggleMute { reply }).await
    }

    /// Returns `true` when the camera is now off.
    pub async fn toggle_camera(&self) -> Result<bool, CallError> {
        self.request(|reply| CallCommand::ToggleCamera { reply })
            .await
    }

    /// Returns `true` when the screen is now being shared.
    pub async fn toggle_screen_share(&self) -> Result<bool, CallError> {
        self.request(|reply| CallCommand::ToggleScreenShare { reply })
            .await
    }

    /// Ends any call and moves the inbox subscription to `local_id`.
    pub async fn switch_identity(&self, local_id: ParticipantId) -> Result<(), CallError> {
        self.request(|reply| CallCommand::SwitchIdentity { local_id, reply })
            .await
    }

    /// Ends any call, unsubscribes the inbox and stops the engine.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(|reply| CallCommand::Shutdown { reply }).await
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }
}
