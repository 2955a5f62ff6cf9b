mod channel;
mod error;

pub use channel::{Channel, COMMAND_TIMEOUT, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY};
pub use error::ChannelError;
