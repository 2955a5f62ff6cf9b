mod error;
mod protocol;

pub use error::ProtocolError;
pub use protocol::{
    parse_line, EndReason, Incoming, PlayerCommand, PlayerEvent, Property, Reply, OBS_DURATION,
    OBS_PAUSE, OBS_TIME_POS,
};
