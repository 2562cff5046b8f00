use crate::model::participant::{CallerProfile, ParticipantId};
use crate::model::room::RoomId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the shape browsers exchange (`{type, sdp}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One trickled network path, `RTCIceCandidateInit` shaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    CallInvite,
    CallAccept,
    CallReject,
    CallBusy,
    CallEnd,
    ParticipantJoined,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::CallInvite => "call-invite",
            Self::CallAccept => "call-accept",
            Self::CallReject => "call-reject",
            Self::CallBusy => "call-busy",
            Self::CallEnd => "call-end",
            Self::ParticipantJoined => "participant-joined",
        }
    }
}

/// Control/negotiation message carried over the broadcast relay.
///
/// Immutable once built; the optional payload fields are only meaningful for
/// the kinds that carry them (`sdp` for offer/answer, `candidate` for
/// ice-candidate, the invitation fields for call-invite).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<ParticipantId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user: Option<CallerProfile>,
}

impl SignalingMessage {
    pub fn new(kind: SignalKind, from: ParticipantId, to: ParticipantId, room_id: RoomId) -> Self {
        Self {
            kind,
            from,
            to,
            room_id,
            sdp: None,
            candidate: None,
            is_video: None,
            participants: None,
            from_user: None,
        }
    }

    pub fn with_sdp(mut self, sdp: SessionDescription) -> Self {
        self.sdp = Some(sdp);
        self
    }

    pub fn with_candidate(mut self, candidate: IceCandidate) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn with_invitation(
        mut self,
        is_video: bool,
        participants: Vec<ParticipantId>,
        from_user: Option<CallerProfile>,
    ) -> Self {
        self.is_video = Some(is_video);
        self.participants = Some(participants);
        self.from_user = from_user;
        self
    }

    pub fn is_addressed_to(&self, participant: &ParticipantId) -> bool {
        &self.to == participant
    }
}
