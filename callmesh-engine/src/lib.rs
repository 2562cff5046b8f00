//! Call orchestration and peer negotiation over an unreliable broadcast relay.
//!
//! The [`CallEngine`] actor turns "call these participants" into a mesh of
//! negotiated peer connections, using the relay only to bootstrap them.

pub mod call;
pub mod config;
pub mod error;
pub mod link;
pub mod media;
pub mod signaling;
pub mod transport;

pub use call::*;
pub use config::EngineConfig;
pub use error::{CallError, MediaError, RelayError};
pub use link::*;
pub use media::*;
pub use signaling::*;
pub use transport::*;
