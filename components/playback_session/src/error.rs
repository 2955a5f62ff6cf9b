use crate::port::PortError;
use control_primitives::ValidationError;
use player_channel::ChannelError;
use player_process::SpawnError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The single-flight command slot is taken and the queue is full.
    #[error("another command is in flight")]
    Busy,

    #[error("no active playback session")]
    NoActiveSession,

    #[error("player spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    #[error("control channel failure: {0}")]
    Channel(#[from] ChannelError),

    #[error("controller has shut down")]
    ControllerClosed,
}

impl From<PortError> for SessionError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Spawn(e) => SessionError::Spawn(e),
            PortError::Channel(e) => SessionError::Channel(e),
        }
    }
}
