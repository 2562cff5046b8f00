//! Peer-to-peer audio/video calls negotiated over a broadcast relay.

pub use callmesh_core::{ParticipantId, RoomId};
pub use callmesh_engine::{CallEngine, CallError, CallEvent, CallHandle, CallSnapshot, CallState};

pub mod model {
    pub use callmesh_core::*;
}

pub mod engine {
    pub use callmesh_engine::*;
}

#[cfg(feature = "relay")]
pub mod relay {
    pub use callmesh_relay::*;
}
