mod participant;
mod relay;
mod room;
mod signaling;
mod topic;

pub use participant::{CallerProfile, ParticipantId};
pub use relay::RelayFrame;
pub use room::RoomId;
pub use signaling::{
    IceCandidate, IceServerConfig, SdpType, SessionDescription, SignalKind, SignalingMessage,
};
pub use topic::{INBOX_TOPIC_PREFIX, ROOM_TOPIC_PREFIX, inbox_topic, room_topic};
