use crate::transport::PeerConnection;
use callmesh_core::{IceCandidate, ParticipantId};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Remote candidates that arrived before their peer's remote description.
///
/// Queues are per peer and FIFO. A peer's queue is removed before it is
/// applied, so a candidate is never applied twice.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: HashMap<ParticipantId, VecDeque<IceCandidate>>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, peer_id: ParticipantId, candidate: IceCandidate) {
        self.pending.entry(peer_id).or_default().push_back(candidate);
    }

    pub fn len_for(&self, peer_id: &ParticipantId) -> usize {
        self.pending.get(peer_id).map(VecDeque::len).unwrap_or(0)
    }

    pub fn take(&mut self, peer_id: &ParticipantId) -> Vec<IceCandidate> {
        self.pending
            .remove(peer_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Applies every queued candidate of `peer_id` in arrival order and
    /// forgets them. Returns how many were applied successfully.
    pub async fn flush(&mut self, peer_id: &ParticipantId, connection: &dyn PeerConnection) -> usize {
        let queued = self.take(peer_id);
        if queued.is_empty() {
            return 0;
        }

        let total = queued.len();
        let mut applied = 0;
        for candidate in queued {
            match connection.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Failed to apply queued candidate for {}: {:?}", peer_id, e),
            }
        }
        debug!("Flushed {}/{} queued candidates for {}", applied, total, peer_id);
        applied
    }

    pub fn discard(&mut self, peer_id: &ParticipantId) {
        self.pending.remove(peer_id);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
