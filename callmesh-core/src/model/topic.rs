use crate::model::participant::ParticipantId;
use crate::model::room::RoomId;

pub const ROOM_TOPIC_PREFIX: &str = "call-room-";
pub const INBOX_TOPIC_PREFIX: &str = "incoming-";

/// Topic carrying all in-call negotiation traffic for one room.
pub fn room_topic(room_id: &RoomId) -> String {
    format!("{ROOM_TOPIC_PREFIX}{room_id}")
}

/// Long-lived per-user topic, only used to deliver invitations.
pub fn inbox_topic(participant_id: &ParticipantId) -> String {
    format!("{INBOX_TOPIC_PREFIX}{participant_id}")
}
