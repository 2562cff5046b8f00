use bytes::Bytes;
use callmesh_core::ParticipantId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// The physical source behind a local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    Microphone,
    Camera,
    Display,
}

impl CaptureKind {
    pub fn track_kind(&self) -> TrackKind {
        match self {
            CaptureKind::Microphone => TrackKind::Audio,
            CaptureKind::Camera | CaptureKind::Display => TrackKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::Microphone => "microphone",
            CaptureKind::Camera => "camera",
            CaptureKind::Display => "display",
        }
    }
}

struct LocalTrackInner {
    id: String,
    source: CaptureKind,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// A captured outbound track. Clones share the same underlying track, so the
/// one stream can be attached to every peer link of a call.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<LocalTrackInner>,
}

impl LocalTrack {
    pub fn new(source: CaptureKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", source.as_str(), uuid::Uuid::new_v4());
        let codec = match source.track_kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_owned(),
        ));

        Self {
            inner: Arc::new(LocalTrackInner {
                id,
                source,
                rtc,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.track_kind()
    }

    pub fn source(&self) -> CaptureKind {
        self.inner.source
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Muting keeps the track attached to every link; samples are dropped
    /// while disabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Marks the track stopped. Returns `true` only for the call that actually
    /// stopped it.
    pub(crate) fn stop(&self) -> bool {
        !self.inner.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.rtc.clone()
    }

    /// Feeds one encoded media sample. Returns `false` when the sample was
    /// suppressed because the track is muted or stopped.
    pub async fn write_sample(&self, sample: &Sample) -> anyhow::Result<bool> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.inner.rtc.write_sample(sample).await?;
        Ok(true)
    }

    /// Feeds one encoded frame lasting `duration`.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> anyhow::Result<bool> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.write_sample(&sample).await
    }

    pub fn same_track(&self, other: &LocalTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        self.same_track(other)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// The local capture stream of one call session.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalStream {
    id: String,
    audio: Option<LocalTrack>,
    video: Option<LocalTrack>,
}

impl LocalStream {
    pub(crate) fn new(id: String, audio: Option<LocalTrack>, video: Option<LocalTrack>) -> Self {
        Self { id, audio, video }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.audio.as_ref()
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.video.as_ref()
    }

    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }

    pub(crate) fn set_video(&mut self, track: LocalTrack) -> Option<LocalTrack> {
        self.video.replace(track)
    }
}

/// An inbound track surfaced by a peer link.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// The backend track to read RTP from; absent for backends that do not
    /// carry real media.
    pub handle: Option<Arc<TrackRemote>>,
}

impl PartialEq for RemoteTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.stream_id == other.stream_id && self.kind == other.kind
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Everything received from one remote participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStream {
    pub participant_id: ParticipantId,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            tracks: Vec::new(),
        }
    }

    /// Adds a track, replacing an earlier one with the same id.
    pub fn upsert(&mut self, track: RemoteTrack) {
        match self.tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track,
            None => self.tracks.push(track),
        }
    }
}
