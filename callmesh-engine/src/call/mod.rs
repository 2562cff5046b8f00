mod call_command;
mod call_engine;
mod call_event;
mod call_handle;
mod call_state;

pub use call_command::*;
pub use call_engine::*;
pub use call_event::*;
pub use call_handle::*;
pub use call_state::*;
