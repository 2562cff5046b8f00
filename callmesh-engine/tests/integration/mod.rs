
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Level;

use callmesh_core::{ParticipantId, RoomId};
use callmesh_engine::{LinkEvent, MediaSource, PeerLinkManager, SyntheticCapture};

use crate::utils::{MockConnector, MockSignalingOutput, SignalMessage};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A link manager wired to mocks, for driving negotiation by hand.
pub struct TestLinks {
    pub manager: PeerLinkManager,
    pub signaling: MockSignalingOutput,
    pub signal_rx: mpsc::UnboundedReceiver<SignalMessage>,
    pub connector: Arc<MockConnector>,
    pub link_rx: mpsc::Receiver<LinkEvent>,
}

pub async fn create_test_links(local_id: &str, room_id: &RoomId) -> TestLinks {
    create_test_links_with(local_id, room_id, MockConnector::new()).await
}

pub async fn create_test_links_with(
    local_id: &str,
    room_id: &RoomId,
    connector: Arc<MockConnector>,
) -> TestLinks {
    let mut media = MediaSource::new(Arc::new(SyntheticCapture::new()));
    let stream = media
        .acquire(true)
        .await
        .expect("Failed to acquire test stream");
    let (signaling, signal_rx) = MockSignalingOutput::new();
    let (link_tx, link_rx) = mpsc::channel(256);

    let manager = PeerLinkManager::new(
        ParticipantId::from(local_id),
        room_id.clone(),
        stream,
        connector.clone(),
        Arc::new(signaling.clone()),
        link_tx,
    );

    TestLinks {
        manager,
        signaling,
        signal_rx,
        connector,
        link_rx,
    }
}
