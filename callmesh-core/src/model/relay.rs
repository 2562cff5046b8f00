use serde::{Deserialize, Serialize};

/// Frames exchanged between a relay client and the broadcast relay.
///
/// Payloads are opaque strings to the relay: it neither parses nor persists
/// them, and delivery is best effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "snake_case")]
pub enum RelayFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: String },
    Subscribed { topic: String },
    Message { topic: String, payload: String },
    Error { reason: String },
}
