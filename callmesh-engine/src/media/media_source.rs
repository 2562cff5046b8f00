use crate::error::MediaError;
use crate::media::capture::CaptureBackend;
use crate::media::track::{CaptureKind, LocalStream, LocalTrack};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the local capture stream of the current session.
///
/// Only the orchestrator drives it: links receive clones of the stream's
/// tracks but never acquire or release devices themselves.
pub struct MediaSource {
    backend: Arc<dyn CaptureBackend>,
    stream: Option<LocalStream>,
    /// Camera track parked while the display is being shared.
    parked_camera: Option<LocalTrack>,
}

impl MediaSource {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            stream: None,
            parked_camera: None,
        }
    }

    pub fn current(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.parked_camera.is_some()
    }

    /// Returns the active stream, capturing microphone (and camera when
    /// `video`) on first use.
    pub async fn acquire(&mut self, video: bool) -> Result<LocalStream, MediaError> {
        if let Some(stream) = &self.stream {
            return Ok(stream.clone());
        }

        let stream_id = uuid::Uuid::new_v4().to_string();
        let audio = self
            .backend
            .capture(CaptureKind::Microphone, &stream_id)
            .await?;

        let video_track = if video {
            match self.backend.capture(CaptureKind::Camera, &stream_id).await {
                Ok(track) => Some(track),
                Err(e) => {
                    self.stop_track(&audio);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let stream = LocalStream::new(stream_id, Some(audio), video_track);
        info!(
            "Acquired local stream {} ({} tracks)",
            stream.id(),
            stream.tracks().len()
        );
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    /// Stops every track of the stream, including a parked camera. Returns
    /// `false` when there was nothing to release.
    pub fn release(&mut self) -> bool {
        let Some(stream) = self.stream.take() else {
            return false;
        };

        for track in stream.tracks() {
            self.stop_track(&track);
        }
        if let Some(camera) = self.parked_camera.take() {
            self.stop_track(&camera);
        }
        info!("Released local stream {}", stream.id());
        true
    }

    /// Replaces the outbound video with a display capture. The camera track is
    /// parked, not stopped, so switching back is instant.
    pub async fn switch_to_display_capture(&mut self) -> Result<LocalStream, MediaError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(MediaError::DeviceUnavailable("no active stream".into()));
        };
        if self.parked_camera.is_some() {
            return Ok(stream.clone());
        }
        if stream.video_track().is_none() {
            return Err(MediaError::DeviceUnavailable(
                "screen sharing needs a video call".into(),
            ));
        }

        let display = self
            .backend
            .capture(CaptureKind::Display, stream.id())
            .await?;
        self.parked_camera = stream.set_video(display);
        Ok(stream.clone())
    }

    pub async fn switch_back_to_camera(&mut self) -> Result<LocalStream, MediaError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(MediaError::DeviceUnavailable("no active stream".into()));
        };
        let Some(camera) = self.parked_camera.take() else {
            return Ok(stream.clone());
        };

        let display = stream.set_video(camera);
        let stream = stream.clone();
        if let Some(display) = display {
            self.stop_track(&display);
        }
        Ok(stream)
    }

    fn stop_track(&self, track: &LocalTrack) {
        if track.stop() {
            self.backend.stop(track);
        } else {
            warn!("Track {} was already stopped", track.id());
        }
    }
}
