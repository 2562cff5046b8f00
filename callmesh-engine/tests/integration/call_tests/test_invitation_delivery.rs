use callmesh_core::{ParticipantId, inbox_topic};
use callmesh_engine::{CallEvent, CallState, DropReason, MemoryRelay};

use crate::integration::call_tests::next_incoming_call;
use crate::integration::init_tracing;
use crate::utils::{STEP_TIMEOUT, drain_events, spawn_peer, wait_for_event, wait_for_state};

#[tokio::test]
async fn test_lost_invitation_is_retransmitted() {
    init_tracing();

    let relay = MemoryRelay::new();
    let mut alice = spawn_peer(&relay, "alice").await.expect("spawn failed");
    let mut bob = spawn_peer(&relay, "bob").await.expect("spawn failed");

    relay.drop_next(&inbox_topic(&ParticipantId::from("bob")), 1);

    let room_id = alice
        .handle
        .initiate_call(vec!["bob".into()], false)
        .await
        .expect("Failed to initiate call");

    let incoming = next_incoming_call(&mut bob).await;
    assert_eq!(incoming.room_id, room_id);

    let retry = wait_for_event(&mut alice.events, STEP_TIMEOUT, |e| {
        matches!(e, CallEvent::InviteSent { attempt: 2, .. })
    })
    .await
    .expect("no retransmission");
    assert_eq!(
        retry,
        CallEvent::InviteSent {
            room_id,
            target: "bob".into(),
            attempt: 2,
        }
    );

    bob.handle.accept_call().await.expect("Failed to accept");
    wait_for_state(&alice.handle, CallState::Connected)
        .await
        .expect("alice not connected");
}

#[tokio::test]
async fn test_retransmitted_invitation_surfaces_once() {
    init_tracing();

    let relay = MemoryRelay::new();
    let mut alice = spawn_peer(&relay, "alice").await.expect("spawn failed");
    let mut bob = spawn_peer(&relay, "bob").await.expect("spawn failed");

    alice
        .handle
        .initiate_call(vec!["bob".into()], false)
        .await
        .expect("Failed to initiate call");

    // All three copies go out while bob leaves the call ringing
    wait_for_event(&mut alice.events, STEP_TIMEOUT, |e| {
        matches!(e, CallEvent::InviteSent { attempt: 3, .. })
    })
    .await
    .expect("retransmission incomplete");

    next_incoming_call(&mut bob).await;
    for _ in 0..2 {
        wait_for_event(&mut bob.events, STEP_TIMEOUT, |e| {
            matches!(
                e,
                CallEvent::SignalDropped {
                    reason: DropReason::DuplicateInvite,
                    ..
                }
            )
        })
        .await
        .expect("duplicate not dropped");
    }

    let later = drain_events(&mut bob.events);
    assert!(
        !later
            .iter()
            .any(|e| matches!(e, CallEvent::IncomingCall(_))),
        "invitation surfaced twice"
    );
    assert_eq!(bob.handle.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_retransmission_stops_after_answer() {
    init_tracing();

    let relay = MemoryRelay::new();
    let mut alice = spawn_peer(&relay, "alice").await.expect("spawn failed");
    let mut bob = spawn_peer(&relay, "bob").await.expect("spawn failed");

    alice
        .handle
        .initiate_call(vec!["bob".into()], false)
        .await
        .expect("Failed to initiate call");
    next_incoming_call(&mut bob).await;
    bob.handle.reject_call().await.expect("Failed to reject");

    wait_for_state(&alice.handle, CallState::Idle)
        .await
        .expect("alice still ringing");
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    let attempts = drain_events(&mut alice.events)
        .iter()
        .filter(|e| matches!(e, CallEvent::InviteSent { .. }))
        .count();
    assert_eq!(attempts, 1, "invitation kept being sent after the answer");
}
