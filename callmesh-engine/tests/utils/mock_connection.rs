use anyhow::{Result, bail};
use async_trait::async_trait;
use callmesh_core::{IceCandidate, ParticipantId, SdpType, SessionDescription};
use callmesh_engine::{
    LinkEvent, LinkHealth, LinkKey, LocalTrack, NegotiationState, PeerConnection, PeerConnector,
    TrackKind,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct MockState {
    negotiation: Option<NegotiationState>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    tracks: Vec<String>,
    video_track: Option<String>,
    applied_candidates: Vec<String>,
    offers_created: usize,
    answers_created: usize,
    closed: bool,
}

/// In-memory stand-in for a negotiated connection.
///
/// Follows the offer/answer state machine, gathers one local candidate per
/// local description and reports `Connected` as soon as an exchange
/// completes. Remote candidates are refused until a remote description is
/// set, so early application shows up as an error.
pub struct MockConnection {
    pub key: LinkKey,
    events: mpsc::Sender<LinkEvent>,
    allow_rollback: bool,
    state: Mutex<MockState>,
}

impl MockConnection {
    fn new(key: LinkKey, events: mpsc::Sender<LinkEvent>, allow_rollback: bool) -> Self {
        Self {
            key,
            events,
            allow_rollback,
            state: Mutex::new(MockState::default()),
        }
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.events.try_send(event);
    }

    fn gathered(&self, role: &str) {
        let candidate = IceCandidate::new(format!(
            "candidate:{}-{}-{}",
            role, self.key.peer_id, self.key.generation
        ));
        self.emit(LinkEvent::CandidateGenerated(self.key.clone(), candidate));
    }

    fn connected(&self) {
        self.emit(LinkEvent::HealthChanged(self.key.clone(), LinkHealth::Checking));
        self.emit(LinkEvent::HealthChanged(self.key.clone(), LinkHealth::Connected));
    }

    /// Simulates the network dropping the connection.
    pub fn fail(&self) {
        self.emit(LinkEvent::HealthChanged(self.key.clone(), LinkHealth::Failed));
    }

    /// Emits `health` under an older generation of this link.
    pub fn report_stale(&self, health: LinkHealth) {
        let mut stale = self.key.clone();
        stale.generation = stale.generation.saturating_sub(1);
        self.emit(LinkEvent::HealthChanged(stale, health));
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.state.lock().unwrap().applied_candidates.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().unwrap().offers_created
    }

    pub fn answers_created(&self) -> usize {
        self.state.lock().unwrap().answers_created
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn track_count(&self) -> usize {
        self.state.lock().unwrap().tracks.len()
    }

    pub fn video_track(&self) -> Option<String> {
        self.state.lock().unwrap().video_track.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    fn negotiation_state(&self) -> NegotiationState {
        self.state
            .lock()
            .unwrap()
            .negotiation
            .unwrap_or(NegotiationState::Stable)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.tracks.push(track.id().to_owned());
        if track.kind() == TrackKind::Video {
            state.video_track = Some(track.id().to_owned());
        }
        Ok(())
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<()> {
        self.state.lock().unwrap().video_track = Some(track.id().to_owned());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                bail!("connection closed");
            }
            if state.negotiation.unwrap_or(NegotiationState::Stable) != NegotiationState::Stable {
                bail!("cannot offer in {:?}", state.negotiation);
            }
            state.offers_created += 1;
            let offer = SessionDescription::offer(format!("mock-offer {}", self.key));
            state.local = Some(offer.clone());
            state.negotiation = Some(NegotiationState::HaveLocalOffer);
            offer
        };
        self.gathered("offer");
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = {
            let mut state = self.state.lock().unwrap();
            if state.negotiation != Some(NegotiationState::HaveRemoteOffer) {
                bail!("cannot answer in {:?}", state.negotiation);
            }
            state.answers_created += 1;
            let answer = SessionDescription::answer(format!("mock-answer {}", self.key));
            state.local = Some(answer.clone());
            state.negotiation = Some(NegotiationState::Stable);
            answer
        };
        self.gathered("answer");
        self.connected();
        Ok(answer)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let completed = {
            let mut state = self.state.lock().unwrap();
            let current = state.negotiation.unwrap_or(NegotiationState::Stable);
            let (next, completed) = match (current, desc.sdp_type) {
                (NegotiationState::Stable | NegotiationState::HaveRemoteOffer, SdpType::Offer) => {
                    (NegotiationState::HaveRemoteOffer, false)
                }
                (NegotiationState::HaveLocalOffer, SdpType::Answer) => {
                    (NegotiationState::Stable, true)
                }
                (current, sdp_type) => bail!("cannot apply {:?} in {:?}", sdp_type, current),
            };
            state.remote = Some(desc);
            state.negotiation = Some(next);
            completed
        };
        if completed {
            self.connected();
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.allow_rollback {
            bail!("rollback not supported");
        }
        let mut state = self.state.lock().unwrap();
        if state.negotiation != Some(NegotiationState::HaveLocalOffer) {
            bail!("nothing to roll back");
        }
        state.local = None;
        state.negotiation = Some(NegotiationState::Stable);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.remote.is_none() {
            bail!("remote description not set");
        }
        state.applied_candidates.push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.negotiation = Some(NegotiationState::Closed);
        }
        self.emit(LinkEvent::HealthChanged(self.key.clone(), LinkHealth::Closed));
        Ok(())
    }
}

/// Connector handing out [`MockConnection`]s and remembering them.
#[derive(Default)]
pub struct MockConnector {
    refuse_rollback: AtomicBool,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing_rollback() -> Arc<Self> {
        let connector = Self::default();
        connector.refuse_rollback.store(true, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn created(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    /// Every connection ever opened towards `peer_id`, oldest first.
    pub fn connections_to(&self, peer_id: &str) -> Vec<Arc<MockConnection>> {
        let peer_id = ParticipantId::from(peer_id);
        self.connections()
            .into_iter()
            .filter(|c| c.key.peer_id == peer_id)
            .collect()
    }

    pub fn latest_to(&self, peer_id: &str) -> Option<Arc<MockConnection>> {
        self.connections_to(peer_id).pop()
    }

    pub fn open_count(&self) -> usize {
        self.connections()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(
        &self,
        key: LinkKey,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Arc<dyn PeerConnection>> {
        let allow_rollback = !self.refuse_rollback.load(Ordering::SeqCst);
        let connection = Arc::new(MockConnection::new(key, events, allow_rollback));
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}
