use crate::error::MediaError;
use crate::media::track::{CaptureKind, LocalTrack};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Platform access to capture devices.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Opens the device and returns a live track (hardware indicator on).
    async fn capture(&self, kind: CaptureKind, stream_id: &str) -> Result<LocalTrack, MediaError>;

    /// Releases the device behind `track` (hardware indicator off). Called
    /// exactly once per captured track.
    fn stop(&self, track: &LocalTrack);
}

/// Backend producing sample-fed tracks that the host application writes
/// encoded media into. Device failures can be configured per source.
#[derive(Default)]
pub struct SyntheticCapture {
    failures: HashMap<CaptureKind, MediaError>,
    active: AtomicUsize,
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(mut self, kind: CaptureKind) -> Self {
        self.failures.insert(
            kind,
            MediaError::PermissionDenied(kind.as_str().to_owned()),
        );
        self
    }

    pub fn unavailable(mut self, kind: CaptureKind) -> Self {
        self.failures.insert(
            kind,
            MediaError::DeviceUnavailable(kind.as_str().to_owned()),
        );
        self
    }

    /// Devices currently open.
    pub fn active_devices(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Devices opened over the lifetime of the backend.
    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Devices released over the lifetime of the backend.
    pub fn total_stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for SyntheticCapture {
    async fn capture(&self, kind: CaptureKind, stream_id: &str) -> Result<LocalTrack, MediaError> {
        if let Some(err) = self.failures.get(&kind) {
            return Err(err.clone());
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let track = LocalTrack::new(kind, stream_id);
        debug!("Opened {} capture as track {}", kind.as_str(), track.id());
        Ok(track)
    }

    fn stop(&self, track: &LocalTrack) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.stopped.fetch_add(1, Ordering::SeqCst);
        debug!("Released capture track {}", track.id());
    }
}
