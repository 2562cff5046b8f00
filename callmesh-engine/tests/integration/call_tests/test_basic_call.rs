use callmesh_core::{ParticipantId, room_topic};
use callmesh_engine::{CallState, EndReason, LinkHealth, MemoryRelay};

use crate::integration::call_tests::{call_ended, connected_pair, next_incoming_call};
use crate::integration::init_tracing;
use crate::utils::{STEP_TIMEOUT, spawn_peer, wait_for_state};

#[tokio::test]
async fn test_one_to_one_call_connects() {
    init_tracing();

    let relay = MemoryRelay::new();
    let alice = spawn_peer(&relay, "alice").await.expect("spawn failed");
    let mut bob = spawn_peer(&relay, "bob").await.expect("spawn failed");

    let room_id = alice
        .handle
        .initiate_call(vec!["bob".into()], true)
        .await
        .expect("Failed to initiate call");
    assert_eq!(alice.handle.state(), CallState::Ringing);

    let incoming = next_incoming_call(&mut bob).await;
    assert_eq!(incoming.room_id, room_id);
    assert_eq!(incoming.from, ParticipantId::from("alice"));
    assert!(incoming.is_video);
    let mut watch = bob.handle.watch();
    let snapshot = watch
        .wait_for(|s| s.incoming.is_some())
        .await
        .expect("engine stopped")
        .clone();
    assert_eq!(snapshot.incoming, Some(incoming));

    let accepted = bob.handle.accept_call().await.expect("Failed to accept");
    assert_eq!(accepted, room_id);

    wait_for_state(&alice.handle, CallState::Connected)
        .await
        .expect("alice not connected");
    wait_for_state(&bob.handle, CallState::Connected)
        .await
        .expect("bob not connected");

    // The caller offers, the callee answers
    let alice_link = alice.link_to("bob").expect("no link");
    let bob_link = bob.link_to("alice").expect("no link");
    assert_eq!(alice_link.offers_created(), 1);
    assert_eq!(bob_link.answers_created(), 1);
    assert_eq!(bob_link.offers_created(), 0);

    let snapshot = alice.handle.snapshot();
    assert_eq!(snapshot.room_id, Some(room_id.clone()));
    assert_eq!(
        snapshot.participants,
        vec![ParticipantId::from("alice"), ParticipantId::from("bob")]
    );
    assert!(snapshot.local_stream.is_some());
    assert_eq!(
        snapshot.peer_health.get(&ParticipantId::from("bob")),
        Some(&LinkHealth::Connected)
    );
    assert_eq!(relay.subscriber_count(&room_topic(&room_id)), 2);
}

#[tokio::test]
async fn test_rejected_call_returns_both_sides_to_idle() {
    init_tracing();

    let relay = MemoryRelay::new();
    let mut alice = spawn_peer(&relay, "alice").await.expect("spawn failed");
    let mut bob = spawn_peer(&relay, "bob").await.expect("spawn failed");

    let room_id = alice
        .handle
        .initiate_call(vec!["bob".into()], false)
        .await
        .expect("Failed to initiate call");
    next_incoming_call(&mut bob).await;

    bob.handle.reject_call().await.expect("Failed to reject");

    assert_eq!(call_ended(&mut alice, STEP_TIMEOUT).await, EndReason::Rejected);
    assert_eq!(alice.handle.state(), CallState::Idle);
    assert_eq!(alice.capture.active_devices(), 0);
    assert_eq!(bob.capture.total_opened(), 0);
    assert!(bob.handle.snapshot().incoming.is_none());
    assert_eq!(relay.subscriber_count(&room_topic(&room_id)), 0);
    assert_eq!(alice.connector.created(), 0);
    assert_eq!(bob.connector.created(), 0);

    // Nothing left to answer
    assert!(bob.handle.accept_call().await.is_err());
}

#[tokio::test]
async fn test_audio_call_has_no_video_track() {
    init_tracing();

    let relay = MemoryRelay::new();
    let (alice, bob, _room) = connected_pair(&relay, "alice", "bob", false).await;

    let stream = alice.handle.snapshot().local_stream.expect("no stream");
    assert!(stream.video_track().is_none());
    assert_eq!(alice.link_to("bob").unwrap().track_count(), 1);
    assert_eq!(bob.link_to("alice").unwrap().track_count(), 1);
}
