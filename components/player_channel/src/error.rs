use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("control socket not available at {0}")]
    Unavailable(PathBuf),

    #[error("timed out waiting for player reply")]
    Timeout,

    #[error("control channel closed")]
    Closed,

    #[error("player rejected command: {0}")]
    Command(String),

    #[error("io error on control socket: {0}")]
    Io(#[from] std::io::Error),
}
