use crate::call::call_command::CallCommand;
use crate::call::call_event::{CallEvent, CallSnapshot, DropReason, EndReason, EventBus};
use crate::call::call_handle::CallHandle;
use crate::call::call_state::{CallSession, CallState, IncomingCall};
use crate::config::EngineConfig;
use crate::error::CallError;
use crate::link::{AnswerOutcome, OfferOutcome, PeerLinkManager};
use crate::media::{CaptureBackend, LocalStream, MediaSource, RemoteStream, SyntheticCapture};
use crate::signaling::{BroadcastRelay, RoomSignaling, SignalingTransport, TopicHandle};
use crate::transport::{
    LinkEvent, LinkHealth, PeerConnector, RtcConnector, TransportConfig,
};
use callmesh_core::{
    CallerProfile, IceCandidate, ParticipantId, RoomId, SessionDescription, SignalKind,
    SignalingMessage, inbox_topic, room_topic,
};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

const COMMAND_CAPACITY: usize = 64;
const LINK_EVENT_CAPACITY: usize = 256;

/// Everything owned by the call in progress.
struct ActiveSession {
    session: CallSession,
    links: PeerLinkManager,
    room_topic: Option<TopicHandle>,
    /// Invitees that have not answered yet, with the time they were invited.
    /// Shared with the invitation senders so retransmission stops on answer.
    outstanding: Arc<DashMap<ParticipantId, Instant>>,
    invite_tasks: Vec<JoinHandle<()>>,
    /// Ring or connect deadline, depending on the state.
    deadline: Option<Instant>,
    remote_streams: BTreeMap<ParticipantId, RemoteStream>,
    peer_health: BTreeMap<ParticipantId, LinkHealth>,
}

/// Configures and starts a [`CallEngine`].
pub struct CallEngineBuilder {
    local_id: ParticipantId,
    relay: Arc<dyn BroadcastRelay>,
    config: EngineConfig,
    transport_config: TransportConfig,
    connector: Option<Arc<dyn PeerConnector>>,
    capture: Option<Arc<dyn CaptureBackend>>,
    profile: Option<CallerProfile>,
}

impl CallEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// ICE servers for the default webrtc connector.
    pub fn transport_config(mut self, transport_config: TransportConfig) -> Self {
        self.transport_config = transport_config;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn capture(mut self, capture: Arc<dyn CaptureBackend>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Presentation data attached to outgoing invitations.
    pub fn profile(mut self, profile: CallerProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Subscribes the identity's inbox and spawns the engine loop.
    pub async fn spawn(self) -> Result<CallHandle, CallError> {
        self.config.validate()?;

        let connector: Arc<dyn PeerConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(RtcConnector::new(self.transport_config).map_err(|e| {
                CallError::TransportUnavailable(format!("webrtc setup failed: {e:#}"))
            })?),
        };
        let capture = self
            .capture
            .unwrap_or_else(|| Arc::new(SyntheticCapture::new()));

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let bus = EventBus::new(self.config.event_capacity);
        let transport = Arc::new(SignalingTransport::new(
            self.relay.clone(),
            self.local_id.clone(),
            self.config.subscribe_timeout,
        ));

        let mut engine = CallEngine {
            config: self.config,
            local_id: self.local_id,
            profile: self.profile,
            relay: self.relay,
            transport,
            connector,
            media: MediaSource::new(capture),
            bus: bus.clone(),
            command_rx,
            signal_tx,
            signal_rx,
            link_tx,
            link_rx,
            inbox: None,
            state: CallState::Idle,
            session: None,
            incoming: None,
            handled_invites: HashMap::new(),
            stopped: false,
        };
        engine.open_inbox().await?;
        engine.refresh_snapshot();

        let handle = CallHandle::new(command_tx, bus.snapshot.subscribe(), bus.events);
        tokio::spawn(engine.run());
        Ok(handle)
    }
}

/// The call orchestrator.
///
/// A single task owns the session, its links and the local media, and
/// serialises commands, inbound signaling, link events and timers. Nothing
/// here blocks on the relay: publishes are queued and invitation
/// retransmission runs in its own task.
pub struct CallEngine {
    config: EngineConfig,
    local_id: ParticipantId,
    profile: Option<CallerProfile>,
    relay: Arc<dyn BroadcastRelay>,
    transport: Arc<SignalingTransport>,
    connector: Arc<dyn PeerConnector>,
    media: MediaSource,
    bus: EventBus,
    command_rx: mpsc::Receiver<CallCommand>,
    signal_tx: mpsc::UnboundedSender<SignalingMessage>,
    signal_rx: mpsc::UnboundedReceiver<SignalingMessage>,
    link_tx: mpsc::Sender<LinkEvent>,
    link_rx: mpsc::Receiver<LinkEvent>,
    inbox: Option<TopicHandle>,
    state: CallState,
    session: Option<ActiveSession>,
    incoming: Option<IncomingCall>,
    /// Invitation rooms already handled, for deduplicating retransmissions.
    handled_invites: HashMap<RoomId, Instant>,
    stopped: bool,
}

impl CallEngine {
    pub fn builder(local_id: ParticipantId, relay: Arc<dyn BroadcastRelay>) -> CallEngineBuilder {
        CallEngineBuilder {
            local_id,
            relay,
            config: EngineConfig::default(),
            transport_config: TransportConfig::default(),
            connector: None,
            capture: None,
            profile: None,
        }
    }

    async fn run(mut self) {
        info!(local_id = %self.local_id, "Call engine started");

        let mut housekeeping = tokio::time::interval(self.config.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stopped {
            let deadline = self.session.as_ref().and_then(|active| active.deadline);

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c).await,
                        None => {
                            info!("Command channel closed. Shutting down call engine.");
                            self.shutdown().await;
                        }
                    }
                }

                Some(msg) = self.signal_rx.recv() => self.handle_signal(msg).await,

                Some(event) = self.link_rx.recv() => self.handle_link_event(event).await,

                _ = wait_until(deadline) => self.on_deadline().await,

                _ = housekeeping.tick() => self.housekeeping().await,
            }

            self.refresh_snapshot();
        }

        info!("Call engine stopped");
    }

    async fn handle_command(&mut self, cmd: CallCommand) {
        match cmd {
            CallCommand::Initiate {
                targets,
                video,
                reply,
            } => {
                let result = self.initiate_call(targets, video).await;
                self.reply(reply, result);
            }
            CallCommand::Invite { targets, reply } => {
                let result = self.invite_participants(targets);
                self.reply(reply, result);
            }
            CallCommand::Accept { reply } => {
                let result = self.accept_call().await;
                self.reply(reply, result);
            }
            CallCommand::Reject { reply } => {
                let result = self.reject_call();
                self.reply(reply, result);
            }
            CallCommand::End { reply } => {
                self.teardown(EndReason::LocalHangup).await;
                self.reply(reply, Ok(()));
            }
            CallCommand::ToggleMute { reply } => {
                let result = self.toggle_mute();
                self.reply(reply, result);
            }
            CallCommand::ToggleCamera { reply } => {
                let result = self.toggle_camera();
                self.reply(reply, result);
            }
            CallCommand::ToggleScreenShare { reply } => {
                let result = self.toggle_screen_share().await;
                self.reply(reply, result);
            }
            CallCommand::SwitchIdentity { local_id, reply } => {
                let result = self.switch_identity(local_id).await;
                self.reply(reply, result);
            }
            CallCommand::Shutdown { reply } => {
                self.shutdown().await;
                self.reply(reply, Ok(()));
            }
        }
    }

    /// Publishes the snapshot before answering, so a caller that awaited a
    /// command always observes its effect.
    fn reply<T>(&self, reply: oneshot::Sender<Result<T, CallError>>, result: Result<T, CallError>) {
        self.refresh_snapshot();
        let _ = reply.send(result);
    }

    async fn initiate_call(
        &mut self,
        targets: Vec<ParticipantId>,
        video: bool,
    ) -> Result<RoomId, CallError> {
        if self.session.is_some() || self.incoming.is_some() {
            return Err(CallError::Busy);
        }
        let targets = normalize_targets(targets, &self.local_id);
        if targets.is_empty() {
            return Err(CallError::InvalidArgument("no one to call".into()));
        }

        let room_id = RoomId::generate();
        let stream = self.media.acquire(video).await?;
        let room_handle = match self
            .transport
            .open(room_topic(&room_id), self.signal_tx.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.media.release();
                return Err(e);
            }
        };

        let mut participants: BTreeSet<_> = targets.iter().cloned().collect();
        participants.insert(self.local_id.clone());
        let session = CallSession::new(room_id.clone(), self.local_id.clone(), participants, video);

        info!(
            "Calling {} participant(s) in room {} (video: {})",
            targets.len(),
            room_id,
            video
        );
        self.session = Some(self.new_active_session(session, stream, room_handle));
        self.transition(CallState::Ringing);
        self.set_deadline(Some(Instant::now() + self.config.ring_timeout));
        self.send_invites(targets);
        Ok(room_id)
    }

    fn invite_participants(&mut self, targets: Vec<ParticipantId>) -> Result<(), CallError> {
        let Some(active) = self.session.as_mut() else {
            return Err(CallError::NoActiveCall);
        };
        let new: Vec<_> = normalize_targets(targets, &self.local_id)
            .into_iter()
            .filter(|id| !active.session.participant_ids.contains(id))
            .collect();
        if new.is_empty() {
            return Err(CallError::InvalidArgument(
                "everyone is already part of the call".into(),
            ));
        }

        active.session.participant_ids.extend(new.iter().cloned());
        info!("Inviting {} more participant(s)", new.len());
        self.send_invites(new);
        Ok(())
    }

    async fn accept_call(&mut self) -> Result<RoomId, CallError> {
        if self.session.is_some() {
            return Err(CallError::Busy);
        }
        let Some(incoming) = self.incoming.take() else {
            return Err(CallError::NoIncomingCall);
        };
        let room_id = incoming.room_id.clone();

        let stream = match self.media.acquire(incoming.is_video).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot accept call from {}: {}", incoming.from, e);
                self.send_room(&room_id, SignalKind::CallReject, &incoming.from);
                return Err(e.into());
            }
        };
        let room_handle = match self
            .transport
            .open(room_topic(&room_id), self.signal_tx.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot accept call from {}: {}", incoming.from, e);
                self.media.release();
                self.send_room(&room_id, SignalKind::CallReject, &incoming.from);
                return Err(e);
            }
        };

        let mut participants: BTreeSet<_> = incoming.participants.iter().cloned().collect();
        participants.insert(incoming.from.clone());
        participants.insert(self.local_id.clone());
        let session = CallSession::new(
            room_id.clone(),
            incoming.from.clone(),
            participants,
            incoming.is_video,
        );
        let others: Vec<_> = session
            .remote_participants(&self.local_id)
            .into_iter()
            .filter(|id| *id != incoming.from)
            .collect();

        info!("Accepted call from {} in room {}", incoming.from, room_id);
        self.session = Some(self.new_active_session(session, stream, room_handle));
        self.transition(CallState::Connecting);
        self.set_deadline(Some(Instant::now() + self.config.connect_timeout));

        self.send_room(&room_id, SignalKind::CallAccept, &incoming.from);
        for other in &others {
            self.send_room(&room_id, SignalKind::ParticipantJoined, other);
        }
        Ok(room_id)
    }

    fn reject_call(&mut self) -> Result<(), CallError> {
        let Some(incoming) = self.incoming.take() else {
            return Err(CallError::NoIncomingCall);
        };
        info!("Rejected call from {} in room {}", incoming.from, incoming.room_id);
        self.send_room(&incoming.room_id, SignalKind::CallReject, &incoming.from);
        Ok(())
    }

    fn toggle_mute(&mut self) -> Result<bool, CallError> {
        if self.session.is_none() {
            return Err(CallError::NoActiveCall);
        }
        let Some(audio) = self.media.current().and_then(LocalStream::audio_track) else {
            return Err(CallError::DeviceUnavailable("no microphone track".into()));
        };
        let muted = audio.is_enabled();
        audio.set_enabled(!muted);
        debug!("Microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(muted)
    }

    fn toggle_camera(&mut self) -> Result<bool, CallError> {
        if self.session.is_none() {
            return Err(CallError::NoActiveCall);
        }
        if self.media.is_sharing_screen() {
            return Err(CallError::InvalidArgument(
                "the camera is parked while sharing the screen".into(),
            ));
        }
        let Some(video) = self.media.current().and_then(LocalStream::video_track) else {
            return Err(CallError::InvalidArgument("audio-only call".into()));
        };
        let off = video.is_enabled();
        video.set_enabled(!off);
        debug!("Camera {}", if off { "off" } else { "on" });
        Ok(off)
    }

    async fn toggle_screen_share(&mut self) -> Result<bool, CallError> {
        let Some(active) = self.session.as_mut() else {
            return Err(CallError::NoActiveCall);
        };
        if !active.session.is_video {
            return Err(CallError::InvalidArgument(
                "screen sharing needs a video call".into(),
            ));
        }

        let stream = if self.media.is_sharing_screen() {
            self.media.switch_back_to_camera().await?
        } else {
            self.media.switch_to_display_capture().await?
        };
        active.links.replace_video_track(&stream).await;

        let sharing = self.media.is_sharing_screen();
        info!("Screen sharing {}", if sharing { "started" } else { "stopped" });
        Ok(sharing)
    }

    async fn switch_identity(&mut self, local_id: ParticipantId) -> Result<(), CallError> {
        if local_id == self.local_id && self.inbox.is_some() {
            return Ok(());
        }

        self.teardown(EndReason::IdentityChanged).await;
        self.incoming = None;
        self.handled_invites.clear();
        self.close_inbox().await;

        info!("Switching identity from {} to {}", self.local_id, local_id);
        self.local_id = local_id;
        self.transport = Arc::new(SignalingTransport::new(
            self.relay.clone(),
            self.local_id.clone(),
            self.config.subscribe_timeout,
        ));
        self.open_inbox().await
    }

    async fn shutdown(&mut self) {
        self.teardown(EndReason::Shutdown).await;
        self.incoming = None;
        self.close_inbox().await;
        self.stopped = true;
    }

    async fn handle_signal(&mut self, msg: SignalingMessage) {
        // Buffered traffic for an identity we no longer hold.
        if !msg.is_addressed_to(&self.local_id) {
            trace!(event = "signal.dropped", reason = "not_addressed", to = %msg.to);
            return;
        }

        if msg.kind == SignalKind::CallInvite {
            self.on_invite(msg);
            return;
        }

        let Some(active) = self.session.as_ref() else {
            self.dropped(&msg, DropReason::NoSession);
            return;
        };
        if active.session.room_id != msg.room_id {
            self.dropped(&msg, DropReason::ForeignRoom);
            return;
        }

        let from = msg.from.clone();
        match msg.kind {
            SignalKind::CallAccept => self.on_accept(from).await,
            SignalKind::CallReject => self.remove_participant(from, EndReason::Rejected).await,
            SignalKind::CallBusy => self.remove_participant(from, EndReason::Busy).await,
            SignalKind::CallEnd => self.remove_participant(from, EndReason::RemoteEnded).await,
            SignalKind::ParticipantJoined => self.on_participant_joined(from).await,
            SignalKind::Offer => match msg.sdp.clone() {
                Some(sdp) => self.on_offer(from, sdp).await,
                None => self.dropped(&msg, DropReason::MissingPayload),
            },
            SignalKind::Answer => match msg.sdp.clone() {
                Some(sdp) => self.on_answer(&msg, sdp).await,
                None => self.dropped(&msg, DropReason::MissingPayload),
            },
            SignalKind::IceCandidate => match msg.candidate.clone() {
                Some(candidate) => self.on_candidate(from, candidate).await,
                None => self.dropped(&msg, DropReason::MissingPayload),
            },
            SignalKind::CallInvite => {}
        }
    }

    fn on_invite(&mut self, msg: SignalingMessage) {
        let in_room = self
            .session
            .as_ref()
            .is_some_and(|active| active.session.room_id == msg.room_id);
        let pending = self
            .incoming
            .as_ref()
            .is_some_and(|incoming| incoming.room_id == msg.room_id);
        if in_room || pending || self.handled_invites.contains_key(&msg.room_id) {
            self.dropped(&msg, DropReason::DuplicateInvite);
            return;
        }

        let now = Instant::now();
        self.handled_invites.insert(msg.room_id.clone(), now);

        if self.session.is_some() || self.incoming.is_some() {
            info!(
                event = "call.busy_sent",
                room = %msg.room_id,
                to = %msg.from,
                "Busy, declining invitation from {}", msg.from
            );
            self.send_room(&msg.room_id, SignalKind::CallBusy, &msg.from);
            self.bus.emit(CallEvent::BusySent {
                room_id: msg.room_id,
                to: msg.from,
            });
            return;
        }

        let incoming = IncomingCall {
            room_id: msg.room_id,
            from: msg.from,
            participants: msg.participants.unwrap_or_default(),
            is_video: msg.is_video.unwrap_or(false),
            caller: msg.from_user,
            received_at: now,
        };
        info!(
            "Incoming {} call from {} in room {}",
            if incoming.is_video { "video" } else { "audio" },
            incoming.from,
            incoming.room_id
        );
        self.incoming = Some(incoming.clone());
        self.bus.emit(CallEvent::IncomingCall(incoming));
    }

    async fn on_accept(&mut self, from: ParticipantId) {
        if let Some(active) = self.session.as_mut() {
            active.outstanding.remove(&from);
            active.session.participant_ids.insert(from.clone());
        }
        info!("{} accepted the call", from);

        if self.state == CallState::Ringing {
            self.transition(CallState::Connecting);
            self.set_deadline(Some(Instant::now() + self.config.connect_timeout));
        }
        self.offer_to(&from).await;
    }

    /// Lower id offers. The higher side answers with its own
    /// `participant-joined` so the lower one learns about it.
    async fn on_participant_joined(&mut self, from: ParticipantId) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.session.participant_ids.insert(from.clone());
        let already_linked = active.links.get(&from).is_some();
        let room_id = active.session.room_id.clone();
        info!("{} joined room {}", from, room_id);

        if self.local_id < from {
            self.offer_to(&from).await;
        } else if !already_linked {
            self.send_room(&room_id, SignalKind::ParticipantJoined, &from);
        }
    }

    async fn on_offer(&mut self, from: ParticipantId, sdp: SessionDescription) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.session.participant_ids.insert(from.clone());

        match active.links.apply_remote_offer(&from, sdp).await {
            Ok(OfferOutcome::Answered { rolled_back }) => {
                if rolled_back {
                    self.bus.emit(CallEvent::GlareResolved {
                        peer_id: from,
                        kept_local_offer: false,
                    });
                }
            }
            Ok(OfferOutcome::IgnoredGlare) => {
                self.bus.emit(CallEvent::GlareResolved {
                    peer_id: from,
                    kept_local_offer: true,
                });
            }
            Err(e) => {
                warn!("Negotiation with {} failed: {:#}", from, e);
                self.fail_link(&from).await;
            }
        }
    }

    async fn on_answer(&mut self, msg: &SignalingMessage, sdp: SessionDescription) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        match active.links.apply_remote_answer(&msg.from, sdp).await {
            Ok(AnswerOutcome::Applied) => debug!("Applied answer from {}", msg.from),
            Ok(AnswerOutcome::Ignored) => self.dropped(msg, DropReason::NotAwaitingAnswer),
            Err(e) => {
                warn!("Negotiation with {} failed: {:#}", msg.from, e);
                self.fail_link(&msg.from).await;
            }
        }
    }

    async fn on_candidate(&mut self, from: ParticipantId, candidate: IceCandidate) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = active.links.apply_remote_candidate(&from, candidate).await {
            warn!("Dropping remote candidate from {}: {:#}", from, e);
        }
    }

    /// `from` rejected, was busy, or left. The call ends once nobody is
    /// linked or still being invited.
    async fn remove_participant(&mut self, from: ParticipantId, reason: EndReason) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.outstanding.remove(&from);
        active.session.participant_ids.remove(&from);
        active.links.close(&from).await;
        active.remote_streams.remove(&from);
        active.peer_health.remove(&from);
        info!("{} left the call ({})", from, reason.as_str());

        self.end_if_empty(reason).await;
    }

    async fn offer_to(&mut self, peer_id: &ParticipantId) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        let result = match active.links.open(peer_id).await {
            Ok(_) => active.links.create_offer(peer_id).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Could not offer to {}: {:#}", peer_id, e);
            self.fail_link(peer_id).await;
        }
    }

    async fn fail_link(&mut self, peer_id: &ParticipantId) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.links.close(peer_id).await;
        active.remote_streams.remove(peer_id);
        active.peer_health.remove(peer_id);
        self.end_if_empty(EndReason::PeersLost).await;
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        let Some(active) = self.session.as_mut() else {
            debug!("Link event from {} after teardown", event.key());
            return;
        };
        if !active.links.is_current(event.key()) {
            debug!("Ignoring event from stale link {}", event.key());
            return;
        }

        match event {
            LinkEvent::CandidateGenerated(key, candidate) => {
                active.links.send_local_candidate(&key, candidate).await;
            }
            LinkEvent::RemoteTrack(key, track) => {
                debug!("Remote {:?} track {} from {}", track.kind, track.id, key.peer_id);
                active
                    .remote_streams
                    .entry(key.peer_id.clone())
                    .or_insert_with(|| RemoteStream::new(key.peer_id.clone()))
                    .upsert(track);
            }
            LinkEvent::HealthChanged(key, health) => {
                let Some(update) = active.links.on_health(&key, health).await else {
                    return;
                };
                if update.removed {
                    active.remote_streams.remove(&key.peer_id);
                    active.peer_health.remove(&key.peer_id);
                } else {
                    active.peer_health.insert(key.peer_id.clone(), health);
                }
                self.bus.emit(CallEvent::PeerHealthChanged {
                    peer_id: key.peer_id,
                    health,
                });

                if health == LinkHealth::Connected
                    && matches!(self.state, CallState::Ringing | CallState::Connecting)
                {
                    self.transition(CallState::Connected);
                    self.set_deadline(None);
                }
                if update.removed {
                    self.end_if_empty(EndReason::PeersLost).await;
                }
            }
        }
    }

    async fn on_deadline(&mut self) {
        self.set_deadline(None);
        let connected = self
            .session
            .as_ref()
            .map(|active| active.links.connected_count())
            .unwrap_or(0);

        match self.state {
            CallState::Ringing => {
                info!(event = "call.timeout", state = "ringing", "Nobody answered");
                self.teardown(EndReason::RingTimeout).await;
            }
            CallState::Connecting if connected == 0 => {
                info!(event = "call.timeout", state = "connecting", "No link connected");
                self.teardown(EndReason::ConnectTimeout).await;
            }
            _ => {}
        }
    }

    async fn housekeeping(&mut self) {
        let now = Instant::now();
        let dedup_window = self.config.invite_dedup_window;
        let ring_timeout = self.config.ring_timeout;

        self.handled_invites
            .retain(|_, handled_at| now.duration_since(*handled_at) < dedup_window);

        if let Some(incoming) = &self.incoming
            && now.duration_since(incoming.received_at) >= ring_timeout
        {
            let room_id = incoming.room_id.clone();
            info!("Invitation for room {} expired", room_id);
            self.incoming = None;
            self.bus.emit(CallEvent::IncomingCallExpired { room_id });
        }

        // While ringing the ring deadline covers the first invitees.
        if self.state == CallState::Ringing {
            return;
        }
        let Some(active) = self.session.as_mut() else {
            return;
        };
        let expired: Vec<_> = active
            .outstanding
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) >= ring_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        if expired.is_empty() {
            return;
        }
        for peer_id in &expired {
            active.outstanding.remove(peer_id);
            active.session.participant_ids.remove(peer_id);
            info!("{} did not answer the invitation", peer_id);
        }
        self.end_if_empty(EndReason::RingTimeout).await;
    }

    async fn end_if_empty(&mut self, reason: EndReason) {
        let empty = self
            .session
            .as_ref()
            .is_some_and(|active| active.links.is_empty() && active.outstanding.is_empty());
        if empty {
            self.teardown(reason).await;
        }
    }

    /// Ends the current call on any exit path. A no-op without a call.
    async fn teardown(&mut self, reason: EndReason) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        let room_id = active.session.room_id.clone();

        for task in active.invite_tasks.drain(..) {
            task.abort();
        }
        active.outstanding.clear();

        let topic = room_topic(&room_id);
        for peer_id in active.session.remote_participants(&self.local_id) {
            let msg = SignalingMessage::new(
                SignalKind::CallEnd,
                self.local_id.clone(),
                peer_id,
                room_id.clone(),
            );
            self.transport.send(&topic, &msg);
        }

        active.links.close_all().await;
        let room_handle = active.room_topic.take();
        self.media.release();
        if let Some(handle) = room_handle {
            self.transport.close(handle).await;
        }

        self.transition(CallState::Ended);
        self.session = None;
        self.transition(CallState::Idle);

        info!(
            event = "call.ended",
            room = %room_id,
            reason = reason.as_str(),
            "Call in room {} ended", room_id
        );
        self.bus.emit(CallEvent::CallEnded { room_id, reason });
    }

    fn new_active_session(
        &self,
        session: CallSession,
        stream: LocalStream,
        room_handle: TopicHandle,
    ) -> ActiveSession {
        let signaling = RoomSignaling::new(self.transport.clone(), session.room_id.clone());
        let links = PeerLinkManager::new(
            self.local_id.clone(),
            session.room_id.clone(),
            stream,
            self.connector.clone(),
            Arc::new(signaling),
            self.link_tx.clone(),
        );

        ActiveSession {
            session,
            links,
            room_topic: Some(room_handle),
            outstanding: Arc::new(DashMap::new()),
            invite_tasks: Vec::new(),
            deadline: None,
            remote_streams: BTreeMap::new(),
            peer_health: BTreeMap::new(),
        }
    }

    /// Starts the retransmitting invitation sender for `targets`.
    fn send_invites(&mut self, targets: Vec<ParticipantId>) {
        let Some(active) = self.session.as_mut() else {
            return;
        };

        let now = Instant::now();
        for target in &targets {
            active.outstanding.insert(target.clone(), now);
        }

        let room_id = active.session.room_id.clone();
        let participants: Vec<_> = active.session.participant_ids.iter().cloned().collect();
        let invites: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let msg = SignalingMessage::new(
                    SignalKind::CallInvite,
                    self.local_id.clone(),
                    target.clone(),
                    room_id.clone(),
                )
                .with_invitation(
                    active.session.is_video,
                    participants.clone(),
                    self.profile.clone(),
                );
                (target, msg)
            })
            .collect();

        let transport = self.transport.clone();
        let outstanding = active.outstanding.clone();
        let bus = self.bus.clone();
        let attempts = self.config.invite_attempts;
        let interval = self.config.invite_retry_interval;

        let task = tokio::spawn(async move {
            for attempt in 1..=attempts {
                for (target, msg) in &invites {
                    if !outstanding.contains_key(target) {
                        continue;
                    }
                    transport.send(&inbox_topic(target), msg);
                    info!(
                        event = "invite.sent",
                        room = %room_id,
                        to = %target,
                        attempt,
                        "Invited {} (attempt {}/{})", target, attempt, attempts
                    );
                    bus.emit(CallEvent::InviteSent {
                        room_id: room_id.clone(),
                        target: target.clone(),
                        attempt,
                    });
                }
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        });
        active.invite_tasks.push(task);
    }

    fn send_room(&self, room_id: &RoomId, kind: SignalKind, to: &ParticipantId) {
        let msg = SignalingMessage::new(kind, self.local_id.clone(), to.clone(), room_id.clone());
        self.transport.send(&room_topic(room_id), &msg);
    }

    fn dropped(&self, msg: &SignalingMessage, reason: DropReason) {
        debug!(
            event = "signal.dropped",
            reason = reason.as_str(),
            kind = msg.kind.as_str(),
            from = %msg.from,
            room = %msg.room_id
        );
        self.bus.emit(CallEvent::SignalDropped {
            kind: msg.kind,
            from: msg.from.clone(),
            reason,
        });
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        if let Some(active) = self.session.as_mut() {
            active.deadline = deadline;
        }
    }

    fn transition(&mut self, next: CallState) {
        let from = self.state;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            warn!("Refusing state change {} -> {}", from.as_str(), next.as_str());
            return;
        }

        self.state = next;
        let room_id = self.session.as_mut().map(|active| {
            active.session.state = next;
            active.session.room_id.clone()
        });
        info!(
            event = "session.state_changed",
            from = from.as_str(),
            to = next.as_str(),
            room = room_id.as_ref().map(RoomId::as_str).unwrap_or("-"),
            "Call state {} -> {}", from.as_str(), next.as_str()
        );
        self.bus.emit(CallEvent::StateChanged {
            room_id,
            from,
            to: next,
        });
    }

    async fn open_inbox(&mut self) -> Result<(), CallError> {
        let handle = self
            .transport
            .open(inbox_topic(&self.local_id), self.signal_tx.clone())
            .await?;
        self.inbox = Some(handle);
        Ok(())
    }

    async fn close_inbox(&mut self) {
        if let Some(handle) = self.inbox.take() {
            self.transport.close(handle).await;
        }
    }

    fn refresh_snapshot(&self) {
        let mut snapshot = CallSnapshot {
            local_id: Some(self.local_id.clone()),
            state: self.state,
            incoming: self.incoming.clone(),
            screen_sharing: self.media.is_sharing_screen(),
            ..Default::default()
        };

        if let Some(active) = &self.session {
            snapshot.room_id = Some(active.session.room_id.clone());
            snapshot.participants = active.session.participant_ids.iter().cloned().collect();
            snapshot.is_video = active.session.is_video;
            snapshot.remote_streams = active.remote_streams.clone();
            snapshot.peer_health = active.peer_health.clone();
        }
        if let Some(stream) = self.media.current() {
            snapshot.muted = stream.audio_track().is_some_and(|t| !t.is_enabled());
            snapshot.camera_off = stream.video_track().is_some_and(|t| !t.is_enabled());
            snapshot.local_stream = Some(stream.clone());
        }

        self.bus.publish(snapshot);
    }
}

/// Drops ourselves and duplicates, keeping the caller's order.
fn normalize_targets(targets: Vec<ParticipantId>, local_id: &ParticipantId) -> Vec<ParticipantId> {
    let mut seen = BTreeSet::new();
    targets
        .into_iter()
        .filter(|id| id != local_id && seen.insert(id.clone()))
        .collect()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
