use callmesh_engine::{CallError, MemoryRelay};

use crate::integration::call_tests::connected_pair;
use crate::integration::init_tracing;
use crate::utils::spawn_peer;

#[tokio::test]
async fn test_mute_and_camera_toggles() {
    init_tracing();

    let relay = MemoryRelay::new();
    let (alice, _bob, _room) = connected_pair(&relay, "alice", "bob", true).await;

    assert_eq!(alice.handle.toggle_mute().await, Ok(true));
    assert!(alice.handle.snapshot().muted);
    let stream = alice.handle.snapshot().local_stream.unwrap();
    assert!(!stream.audio_track().unwrap().is_enabled());

    assert_eq!(alice.handle.toggle_camera().await, Ok(true));
    assert!(alice.handle.snapshot().camera_off);

    assert_eq!(alice.handle.toggle_mute().await, Ok(false));
    assert_eq!(alice.handle.toggle_camera().await, Ok(false));
    let snapshot = alice.handle.snapshot();
    assert!(!snapshot.muted);
    assert!(!snapshot.camera_off);

    // Toggling never touches the devices themselves
    assert_eq!(alice.capture.active_devices(), 2);
}

#[tokio::test]
async fn test_screen_share_swaps_outbound_video() {
    init_tracing();

    let relay = MemoryRelay::new();
    let (alice, _bob, _room) = connected_pair(&relay, "alice", "bob", true).await;
    let link = alice.link_to("bob").unwrap();
    let camera = link.video_track().expect("no video on link");

    assert_eq!(alice.handle.toggle_screen_share().await, Ok(true));
    assert!(alice.handle.snapshot().screen_sharing);
    assert_ne!(link.video_track(), Some(camera.clone()));
    assert_eq!(alice.capture.active_devices(), 3);
    assert!(matches!(
        alice.handle.toggle_camera().await,
        Err(CallError::InvalidArgument(_))
    ));

    assert_eq!(alice.handle.toggle_screen_share().await, Ok(false));
    assert_eq!(link.video_track(), Some(camera));
    assert_eq!(alice.capture.active_devices(), 2);

    // No renegotiation happened
    assert_eq!(link.offers_created(), 1);
}

#[tokio::test]
async fn test_controls_need_a_call() {
    init_tracing();

    let relay = MemoryRelay::new();
    let alice = spawn_peer(&relay, "alice").await.expect("spawn failed");

    assert_eq!(alice.handle.toggle_mute().await, Err(CallError::NoActiveCall));
    assert_eq!(alice.handle.toggle_camera().await, Err(CallError::NoActiveCall));
    assert_eq!(
        alice.handle.toggle_screen_share().await,
        Err(CallError::NoActiveCall)
    );
}

#[tokio::test]
async fn test_audio_call_cannot_share_screen() {
    init_tracing();

    let relay = MemoryRelay::new();
    let (alice, _bob, _room) = connected_pair(&relay, "alice", "bob", false).await;

    assert!(matches!(
        alice.handle.toggle_screen_share().await,
        Err(CallError::InvalidArgument(_))
    ));
    assert!(matches!(
        alice.handle.toggle_camera().await,
        Err(CallError::InvalidArgument(_))
    ));
}
