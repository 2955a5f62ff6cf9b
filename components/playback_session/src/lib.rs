mod controller;
mod error;
mod port;
mod state;

pub use controller::{spawn, SessionHandle, SessionOp, OP_QUEUE_DEPTH};
pub use error::SessionError;
pub use player_protocol::{PlayerCommand, PlayerEvent, Reply};
pub use port::{MpvPort, PlayerPort, PortError};
pub use state::{InvalidTransition, PlaybackState, SessionView, StateEdge};
