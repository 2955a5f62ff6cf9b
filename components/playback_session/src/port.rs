use async_trait::async_trait;
use control_primitives::{OutputRoute, Volume};
use player_channel::{Channel, ChannelError};
use player_process::{session_socket_path, PlayerProcess, PlayerSpec, SpawnError, TERM_GRACE};
use player_protocol::{PlayerCommand, PlayerEvent, Reply};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Everything the controller needs from the player side: spawn-and-connect,
/// one correlated command at a time, a liveness probe, and teardown. Tests
/// drive the controller through a scripted implementation.
#[async_trait]
pub trait PlayerPort: Send {
    /// Tear down any existing player, spawn a fresh one bound to `media`,
    /// connect the control channel, and return its event stream.
    async fn launch(
        &mut self,
        media: &Path,
        route: OutputRoute,
        volume: Volume,
    ) -> Result<mpsc::Receiver<PlayerEvent>, PortError>;

    async fn command(&mut self, command: PlayerCommand) -> Result<Reply, PortError>;

    fn is_alive(&mut self) -> bool;

    /// Graceful: quit over the channel, bounded wait, then signals.
    /// Otherwise straight to signals. Idempotent either way.
    async fn shutdown(&mut self, graceful: bool);
}

/// The real player: an mpv process plus its control socket.
pub struct MpvPort {
    spec: PlayerSpec,
    process: Option<PlayerProcess>,
    channel: Option<Channel>,
}

impl MpvPort {
    pub fn new(spec: PlayerSpec) -> Self {
        Self {
            spec,
            process: None,
            channel: None,
        }
    }
}

#[async_trait]
impl PlayerPort for MpvPort {
    async fn launch(
        &mut self,
        media: &Path,
        route: OutputRoute,
        volume: Volume,
    ) -> Result<mpsc::Receiver<PlayerEvent>, PortError> {
        self.shutdown(true).await;

        let socket_path = session_socket_path();
        self.process = Some(PlayerProcess::spawn(
            &self.spec,
            media,
            &socket_path,
            route,
            volume,
        )?);

        let mut channel = match Channel::connect(&socket_path).await {
            Ok(channel) => channel,
            Err(e) => {
                self.shutdown(false).await;
                return Err(e.into());
            }
        };

        if let Err(e) = channel.register_observers().await {
            self.channel = Some(channel);
            self.shutdown(false).await;
            return Err(e.into());
        }

        let events = channel.observe().ok_or(ChannelError::Closed)?;
        self.channel = Some(channel);
        Ok(events)
    }

    async fn command(&mut self, command: PlayerCommand) -> Result<Reply, PortError> {
        match self.channel.as_mut() {
            Some(channel) => Ok(channel.send(command).await?),
            None => Err(ChannelError::Closed.into()),
        }
    }

    fn is_alive(&mut self) -> bool {
        self.process.as_mut().map(|p| p.is_alive()).unwrap_or(false)
    }

    async fn shutdown(&mut self, graceful: bool) {
        if let Some(mut channel) = self.channel.take() {
            if graceful {
                // Best effort; the signal path below covers a deaf player.
                let _ = channel.send(PlayerCommand::Quit).await;
            }
            channel.close().await;
        }

        if let Some(mut process) = self.process.take() {
            let grace = if graceful {
                // Quit was already sent; give the player its bounded window
                // to exit on its own before falling back to signals.
                if process.wait_exit(TERM_GRACE).await {
                    debug!("player exited on quit command");
                }
                Duration::from_secs(1)
            } else {
                Duration::from_millis(500)
            };
            process.terminate(grace).await;
        }
    }
}
