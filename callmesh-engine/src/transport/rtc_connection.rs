use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::transport::peer_connection::{NegotiationState, PeerConnection, PeerConnector};
use crate::transport::transport_config::TransportConfig;
use crate::transport::transport_event::{LinkEvent, LinkHealth, LinkKey};
use anyhow::{Context, Result};
use async_trait::async_trait;
use callmesh_core::{IceCandidate, SdpType, SessionDescription};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

/// webrtc-rs backed connector: default codecs, default interceptors and the
/// configured ICE servers.
pub struct RtcConnector {
    api: API,
    config: TransportConfig,
}

impl RtcConnector {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()
            .context("Failed to register default codecs")?;
        let registry = register_default_interceptors(Registry::new(), &mut m)
            .context("Failed to register interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                })
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(
        &self,
        key: LinkKey,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Arc<dyn PeerConnection>> {
        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .context("Failed to create peer connection")?,
        );

        let state_tx = events.clone();
        let state_key = key.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let key = state_key.clone();

                Box::pin(async move {
                    let Some(health) = map_connection_state(s) else {
                        return;
                    };
                    debug!("Peer connection state for {} is now {}", key, s);
                    let _ = tx.send(LinkEvent::HealthChanged(key, health)).await;
                })
            },
        ));

        let ice_tx = events.clone();
        let ice_key = key.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let key = ice_key.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate = IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                };
                let _ = tx.send(LinkEvent::CandidateGenerated(key, candidate)).await;
            })
        }));

        let track_tx = events.clone();
        let track_key = key.clone();
        peer_connection.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let tx = track_tx.clone();
            let key = track_key.clone();

            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                info!("Remote {:?} track from {}", kind, key);
                let remote = RemoteTrack {
                    id: track.id().to_string(),
                    stream_id: track.stream_id().to_string(),
                    kind,
                    handle: Some(track),
                };
                let _ = tx.send(LinkEvent::RemoteTrack(key, remote)).await;
            })
        }));

        Ok(Arc::new(RtcConnection {
            key,
            peer_connection,
            video_sender: Mutex::new(None),
        }))
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<LinkHealth> {
    match state {
        RTCPeerConnectionState::New => Some(LinkHealth::New),
        RTCPeerConnectionState::Connecting => Some(LinkHealth::Checking),
        RTCPeerConnectionState::Connected => Some(LinkHealth::Connected),
        RTCPeerConnectionState::Disconnected => Some(LinkHealth::Disconnected),
        RTCPeerConnectionState::Failed => Some(LinkHealth::Failed),
        RTCPeerConnectionState::Closed => Some(LinkHealth::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => rollback_description(),
    };
    Ok(rtc)
}

fn rollback_description() -> RTCSessionDescription {
    let mut desc = RTCSessionDescription::default();
    desc.sdp_type = RTCSdpType::Rollback;
    desc
}

pub struct RtcConnection {
    key: LinkKey,
    peer_connection: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

#[async_trait]
impl PeerConnection for RtcConnection {
    fn negotiation_state(&self) -> NegotiationState {
        match self.peer_connection.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => {
                NegotiationState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
                NegotiationState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => NegotiationState::Closed,
            _ => NegotiationState::Stable,
        }
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(track.rtc_track())
            .await
            .with_context(|| format!("Failed to add track {} for {}", track.id(), self.key))?;

        if track.kind() == TrackKind::Video {
            *self.video_sender.lock().await = Some(sender.clone());
        }

        // RTCP has to be drained for the interceptors to work.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn replace_video_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self.video_sender.lock().await.clone();
        let Some(sender) = sender else {
            warn!("No video sender on {}, nothing to replace", self.key);
            return Ok(());
        };
        sender
            .replace_track(Some(track.rtc_track()))
            .await
            .context("Failed to replace video track")?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.peer_connection
            .set_local_description(rollback_description())
            .await
            .context("Rollback refused")?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
