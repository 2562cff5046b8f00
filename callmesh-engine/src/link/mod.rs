mod candidate_queue;
mod peer_link;
mod peer_link_manager;

pub use candidate_queue::*;
pub use peer_link::*;
pub use peer_link_manager::*;
