use crate::media::LocalTrack;
use crate::transport::transport_event::{LinkEvent, LinkKey};
use anyhow::Result;
use async_trait::async_trait;
use callmesh_core::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Offer/answer state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// One negotiated media connection to a remote participant.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn negotiation_state(&self) -> NegotiationState;

    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Swaps the outbound video track in place, without renegotiation.
    async fn replace_video_track(&self, track: &LocalTrack) -> Result<()>;

    /// Creates an offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Creates an answer to the current remote offer and installs it.
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Drops a pending local offer, returning to `Stable`.
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates connections. Each connection reports through `events`, tagged
/// with `key`.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        key: LinkKey,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Arc<dyn PeerConnection>>;
}
