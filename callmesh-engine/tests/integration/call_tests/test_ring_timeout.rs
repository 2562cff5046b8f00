use std::time::Duration;

use callmesh_core::room_topic;
use callmesh_engine::{CallError, CallEvent, CallState, EndReason, MemoryRelay};

use crate::integration::call_tests::{call_ended, next_incoming_call};
use crate::integration::init_tracing;
use crate::utils::{drain_events, spawn_peer, wait_for_event};

const PAST_RING_TIMEOUT: Duration = Duration::from_secs(45);

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out() {
    init_tracing();

    let relay = MemoryRelay::new();
    let mut alice = spawn_peer(&relay, "alice").await.expect("spawn failed");
    let mut bob = spawn_peer(&relay, "bob").await.expect("spawn failed");

    let started = tokio::time::Instant::now();
    let room_id = alice
        .handle
        .initiate_call(vec!["bob".into()], true)
        .await
        .expect("Failed to initiate call");
    next_incoming_call(&mut bob).await;

    assert_eq!(
        call_ended(&mut alice, PAST_RING_TIMEOUT).await,
        EndReason::RingTimeout
    );
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(alice.handle.state(), CallState::Idle);
    assert_eq!(alice.capture.active_devices(), 0);
    assert_eq!(relay.subscriber_count(&room_topic(&room_id)), 0);

    // The invitee's pending invitation lapses on the same timeout
    let expired = wait_for_event(&mut bob.events, PAST_RING_TIMEOUT, |e| {
        matches!(e, CallEvent::IncomingCallExpired { .. })
    })
    .await
    .expect("invitation never expired");
    assert_eq!(expired, CallEvent::IncomingCallExpired { room_id });
    assert!(bob.handle.snapshot().incoming.is_none());
    assert_eq!(
        bob.handle.accept_call().await,
        Err(CallError::NoIncomingCall)
    );

    // Neither the deadline nor housekeeping tears the session down again
    tokio::time::sleep(PAST_RING_TIMEOUT).await;
    let late_ends = drain_events(&mut alice.events)
        .iter()
        .filter(|e| matches!(e, CallEvent::CallEnded { .. }))
        .count();
    assert_eq!(late_ends, 0);
    assert_eq!(alice.capture.total_opened(), 2);
    assert_eq!(alice.capture.total_stopped(), alice.capture.total_opened());
}

#[tokio::test(start_paused = true)]
async fn test_calling_nobody_times_out() {
    init_tracing();

    let relay = MemoryRelay::new();
    let mut alice = spawn_peer(&relay, "alice").await.expect("spawn failed");

    alice
        .handle
        .initiate_call(vec!["nobody".into()], false)
        .await
        .expect("publishing into the void still starts the call");

    assert_eq!(
        call_ended(&mut alice, PAST_RING_TIMEOUT).await,
        EndReason::RingTimeout
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_invitee_is_dropped_from_running_call() {
    init_tracing();

    let relay = MemoryRelay::new();
    let mut alice = spawn_peer(&relay, "alice").await.expect("spawn failed");
    let mut bob = spawn_peer(&relay, "bob").await.expect("spawn failed");

    alice
        .handle
        .initiate_call(vec!["bob".into(), "carol".into()], false)
        .await
        .expect("Failed to initiate call");
    next_incoming_call(&mut bob).await;
    bob.handle.accept_call().await.expect("Failed to accept");

    // carol never answers; the call goes on without her
    let mut watch = alice.handle.watch();
    tokio::time::timeout(
        PAST_RING_TIMEOUT,
        watch.wait_for(|s| s.state == CallState::Connected && s.participants.len() == 2),
    )
    .await
    .expect("carol never dropped")
    .expect("engine stopped");

    alice.handle.end_call().await.expect("end failed");
    assert_eq!(
        call_ended(&mut alice, Duration::from_secs(1)).await,
        EndReason::LocalHangup
    );
}
