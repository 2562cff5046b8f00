use crate::link::candidate_queue::CandidateQueue;
use crate::link::peer_link::PeerLink;
use crate::media::LocalStream;
use crate::signaling::SignalingOutput;
use crate::transport::{LinkEvent, LinkHealth, LinkKey, NegotiationState, PeerConnector};
use anyhow::{Context, Result};
use callmesh_core::{IceCandidate, ParticipantId, RoomId, SessionDescription};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// The offer was applied and answered. `rolled_back` is set when our own
    /// pending offer had to give way.
    Answered { rolled_back: bool },
    /// Glare that we win: the incoming offer is dropped and ours stands.
    IgnoredGlare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Applied,
    /// No link, or the link was not waiting for an answer.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthUpdate {
    pub health: LinkHealth,
    /// The link reached a terminal state and was removed.
    pub removed: bool,
}

/// Owns every peer link of one room.
///
/// The room and the local stream are fixed for the manager's lifetime; every
/// new link gets all tracks of the current stream. There is at most one link
/// per peer, and a dead link is closed before it is replaced.
pub struct PeerLinkManager {
    local_id: ParticipantId,
    room_id: RoomId,
    stream: LocalStream,
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingOutput>,
    events: mpsc::Sender<LinkEvent>,
    links: HashMap<ParticipantId, PeerLink>,
    candidates: CandidateQueue,
    next_generation: u64,
}

impl PeerLinkManager {
    pub fn new(
        local_id: ParticipantId,
        room_id: RoomId,
        stream: LocalStream,
        connector: Arc<dyn PeerConnector>,
        signaling: Arc<dyn SignalingOutput>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Self {
        Self {
            local_id,
            room_id,
            stream,
            connector,
            signaling,
            events,
            links: HashMap::new(),
            candidates: CandidateQueue::new(),
            next_generation: 1,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn get(&self, peer_id: &ParticipantId) -> Option<&PeerLink> {
        self.links.get(peer_id)
    }

    pub fn peers(&self) -> Vec<ParticipantId> {
        self.links.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.links
            .values()
            .filter(|link| link.health == LinkHealth::Connected)
            .count()
    }

    pub fn queued_candidates(&self, peer_id: &ParticipantId) -> usize {
        self.candidates.len_for(peer_id)
    }

    /// Whether `key` names a link that is still alive in this room.
    pub fn is_current(&self, key: &LinkKey) -> bool {
        key.room_id == self.room_id
            && self
                .links
                .get(&key.peer_id)
                .is_some_and(|link| link.key.generation == key.generation)
    }

    /// Returns the live link to `peer_id`, creating one (with every local
    /// track attached) when there is none or the old one is dead.
    pub async fn open(&mut self, peer_id: &ParticipantId) -> Result<LinkKey> {
        if let Some(link) = self.links.get(peer_id) {
            if link.is_usable() {
                return Ok(link.key.clone());
            }
            debug!("Replacing dead link {}", link.key);
            // Queued candidates belong to the next negotiation, keep them.
            self.drop_link(peer_id).await;
        }

        let key = LinkKey {
            peer_id: peer_id.clone(),
            room_id: self.room_id.clone(),
            generation: self.next_generation,
        };
        self.next_generation += 1;

        let connection = self
            .connector
            .connect(key.clone(), self.events.clone())
            .await
            .with_context(|| format!("Failed to connect to {peer_id}"))?;

        for track in self.stream.tracks() {
            if let Err(e) = connection.add_track(&track).await {
                let _ = connection.close().await;
                return Err(e.context(format!("Failed to attach local media for {peer_id}")));
            }
        }

        info!(
            event = "peer.link_opened",
            peer = %peer_id,
            room = %self.room_id,
            generation = key.generation,
            "Opened link to {}", peer_id
        );
        self.links
            .insert(peer_id.clone(), PeerLink::new(key.clone(), connection));
        Ok(key)
    }

    /// Sends an offer to `peer_id`, at most once per link. Returns `false`
    /// when the link has already negotiated or does not exist.
    pub async fn create_offer(&mut self, peer_id: &ParticipantId) -> Result<bool> {
        let Some(link) = self.links.get_mut(peer_id) else {
            debug!("No link to {}, not offering", peer_id);
            return Ok(false);
        };
        if link.offer_sent || link.remote_description_set {
            debug!("Link {} already negotiated, offer skipped", link.key);
            return Ok(false);
        }

        let offer = link.connection.create_offer().await?;
        link.offer_sent = true;
        debug!("Sending offer to {}", peer_id);
        self.signaling.send_offer(peer_id.clone(), offer).await;
        Ok(true)
    }

    /// Applies an incoming offer, resolving glare by id order: when both sides
    /// have offered, the greater id rolls back and answers, the lesser id
    /// keeps its own offer.
    pub async fn apply_remote_offer(
        &mut self,
        peer_id: &ParticipantId,
        desc: SessionDescription,
    ) -> Result<OfferOutcome> {
        self.open(peer_id).await?;

        let mut rolled_back = false;
        let pending_local_offer = self
            .links
            .get(peer_id)
            .is_some_and(|link| link.negotiation_state() == NegotiationState::HaveLocalOffer);

        if pending_local_offer {
            if self.local_id < *peer_id {
                info!(
                    event = "peer.glare",
                    peer = %peer_id,
                    outcome = "kept_local_offer",
                    "Glare with {}, keeping our offer", peer_id
                );
                return Ok(OfferOutcome::IgnoredGlare);
            }

            info!(
                event = "peer.glare",
                peer = %peer_id,
                outcome = "rolled_back",
                "Glare with {}, rolling back our offer", peer_id
            );
            rolled_back = true;
            let rollback = match self.links.get(peer_id) {
                Some(link) => link.connection.rollback().await,
                None => Ok(()),
            };
            if let Err(e) = rollback {
                warn!("Rollback failed for {}, recreating link: {:?}", peer_id, e);
                // Queued candidates belong to the offer being applied.
                self.drop_link(peer_id).await;
                self.open(peer_id).await?;
            }
        }

        let Some(link) = self.links.get_mut(peer_id) else {
            anyhow::bail!("Link to {peer_id} vanished while applying offer");
        };
        link.connection
            .set_remote_description(desc)
            .await
            .context("Failed to apply remote offer")?;
        link.remote_description_set = true;
        self.candidates
            .flush(peer_id, link.connection.as_ref())
            .await;

        let answer = link
            .connection
            .create_answer()
            .await
            .context("Failed to create answer")?;
        debug!("Sending answer to {}", peer_id);
        self.signaling.send_answer(peer_id.clone(), answer).await;
        Ok(OfferOutcome::Answered { rolled_back })
    }

    /// Applies an answer, but only while the link is waiting for one.
    pub async fn apply_remote_answer(
        &mut self,
        peer_id: &ParticipantId,
        desc: SessionDescription,
    ) -> Result<AnswerOutcome> {
        let Some(link) = self.links.get_mut(peer_id) else {
            debug!(event = "signal.dropped", reason = "no_link", peer = %peer_id, "answer");
            return Ok(AnswerOutcome::Ignored);
        };
        if link.negotiation_state() != NegotiationState::HaveLocalOffer {
            debug!(
                event = "signal.dropped",
                reason = "not_awaiting_answer",
                peer = %peer_id,
                "answer"
            );
            return Ok(AnswerOutcome::Ignored);
        }

        link.connection
            .set_remote_description(desc)
            .await
            .context("Failed to apply remote answer")?;
        link.remote_description_set = true;
        self.candidates
            .flush(peer_id, link.connection.as_ref())
            .await;
        Ok(AnswerOutcome::Applied)
    }

    /// Applies a candidate now if the peer's description is known, otherwise
    /// queues it. A candidate may arrive before the link exists at all.
    pub async fn apply_remote_candidate(
        &mut self,
        peer_id: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome> {
        match self.links.get(peer_id) {
            Some(link) if link.remote_description_set => {
                link.connection
                    .add_ice_candidate(candidate)
                    .await
                    .context("Failed to add remote candidate")?;
                Ok(CandidateOutcome::Applied)
            }
            _ => {
                self.candidates.enqueue(peer_id.clone(), candidate);
                Ok(CandidateOutcome::Queued)
            }
        }
    }

    /// Trickles a locally gathered candidate, unless its link is gone.
    pub async fn send_local_candidate(&self, key: &LinkKey, candidate: IceCandidate) -> bool {
        if !self.is_current(key) {
            return false;
        }
        self.signaling.send_ice(key.peer_id.clone(), candidate).await;
        true
    }

    /// Records a health transition. Terminal states remove the link. Returns
    /// `None` for stale links and repeated states.
    pub async fn on_health(&mut self, key: &LinkKey, health: LinkHealth) -> Option<HealthUpdate> {
        if !self.is_current(key) {
            debug!("Ignoring {} health from stale link {}", health.as_str(), key);
            return None;
        }
        let link = self.links.get_mut(&key.peer_id)?;
        if link.health == health {
            return None;
        }

        info!(
            event = "peer.health_changed",
            peer = %key.peer_id,
            from = link.health.as_str(),
            to = health.as_str(),
            "Link {} is {}", key, health.as_str()
        );
        link.health = health;

        let removed = health.is_terminal();
        if removed {
            self.close(&key.peer_id).await;
        }
        Some(HealthUpdate { health, removed })
    }

    /// Closes and forgets the link to `peer_id` along with its queued
    /// candidates. Returns `false` when there was no link.
    pub async fn close(&mut self, peer_id: &ParticipantId) -> bool {
        self.candidates.discard(peer_id);
        self.drop_link(peer_id).await
    }

    pub async fn close_all(&mut self) {
        let peers: Vec<_> = self.links.keys().cloned().collect();
        for peer_id in peers {
            self.drop_link(&peer_id).await;
        }
        self.candidates.clear();
    }

    /// Points every link's outbound video at the stream's current video
    /// track, without renegotiating.
    pub async fn replace_video_track(&mut self, stream: &LocalStream) {
        self.stream = stream.clone();
        let Some(video) = stream.video_track() else {
            return;
        };
        for link in self.links.values() {
            if let Err(e) = link.connection.replace_video_track(video).await {
                warn!("Failed to replace video track on {}: {:?}", link.key, e);
            }
        }
    }

    async fn drop_link(&mut self, peer_id: &ParticipantId) -> bool {
        let Some(link) = self.links.remove(peer_id) else {
            return false;
        };
        if let Err(e) = link.connection.close().await {
            warn!("Error closing link {}: {:?}", link.key, e);
        }
        info!(
            event = "peer.link_closed",
            peer = %peer_id,
            room = %self.room_id,
            generation = link.key.generation,
            "Closed link to {}", peer_id
        );
        true
    }
}
