use tokio::sync::mpsc;

use callmesh_core::{ParticipantId, RoomId};
use callmesh_engine::{
    CaptureKind, LinkEvent, LinkKey, LocalTrack, NegotiationState, PeerConnector, RtcConnector,
    TransportConfig,
};

use crate::integration::init_tracing;

fn key(peer: &str, room_id: &RoomId) -> LinkKey {
    LinkKey {
        peer_id: ParticipantId::from(peer),
        room_id: room_id.clone(),
        generation: 1,
    }
}

#[tokio::test]
async fn test_rtc_offer_answer_reaches_stable() {
    init_tracing();

    // Host candidates only
    let config = TransportConfig {
        ice_servers: vec![],
    };
    let connector = RtcConnector::new(config).expect("Failed to build connector");
    let room_id = RoomId::generate();

    let (alice_tx, _alice_rx) = mpsc::channel::<LinkEvent>(64);
    let (bob_tx, _bob_rx) = mpsc::channel::<LinkEvent>(64);
    let alice = connector
        .connect(key("bob", &room_id), alice_tx)
        .await
        .expect("Failed to create alice connection");
    let bob = connector
        .connect(key("alice", &room_id), bob_tx)
        .await
        .expect("Failed to create bob connection");

    alice
        .add_track(&LocalTrack::new(CaptureKind::Microphone, "alice-stream"))
        .await
        .expect("Failed to add alice track");
    bob.add_track(&LocalTrack::new(CaptureKind::Microphone, "bob-stream"))
        .await
        .expect("Failed to add bob track");

    let offer = alice.create_offer().await.expect("Failed to create offer");
    assert_eq!(alice.negotiation_state(), NegotiationState::HaveLocalOffer);
    assert!(offer.sdp.contains("m=audio"));

    bob.set_remote_description(offer)
        .await
        .expect("Failed to apply offer");
    assert_eq!(bob.negotiation_state(), NegotiationState::HaveRemoteOffer);

    let answer = bob.create_answer().await.expect("Failed to create answer");
    alice
        .set_remote_description(answer)
        .await
        .expect("Failed to apply answer");

    assert_eq!(alice.negotiation_state(), NegotiationState::Stable);
    assert_eq!(bob.negotiation_state(), NegotiationState::Stable);

    alice.close().await.expect("Failed to close alice");
    bob.close().await.expect("Failed to close bob");
}
