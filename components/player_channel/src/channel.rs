use crate::error::ChannelError;
use parking_lot::Mutex;
use player_protocol::{
    parse_line, Incoming, PlayerCommand, PlayerEvent, Property, Reply, OBS_DURATION, OBS_PAUSE,
    OBS_TIME_POS,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// The player creates its socket asynchronously after spawn, so the first
/// connect is a bounded retry loop rather than a single attempt.
pub const CONNECT_ATTEMPTS: u32 = 10;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// How long one request may wait for its correlated reply.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Request/reply transport to the player over its control socket.
///
/// A background reader task routes correlated replies back to `send` callers
/// and forwards unsolicited notifications to the receiver handed out by
/// `observe`.
pub struct Channel {
    writer: Option<OwnedWriteHalf>,
    pending: PendingReplies,
    next_request_id: u64,
    events: Option<mpsc::Receiver<PlayerEvent>>,
    reader: Option<JoinHandle<()>>,
    socket_path: PathBuf,
}

impl Channel {
    /// Connect to the player's socket, waiting for the socket file to appear.
    pub async fn connect(socket_path: &Path) -> Result<Self, ChannelError> {
        let stream = dial(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(64);
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&pending), event_tx));

        debug!(socket = %socket_path.display(), "control channel connected");
        Ok(Self {
            writer: Some(write_half),
            pending,
            next_request_id: 0,
            events: Some(event_rx),
            reader: Some(reader),
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Send one request and wait for its correlated reply.
    pub async fn send(&mut self, command: PlayerCommand) -> Result<Reply, ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::Closed)?;

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let mut line = command.to_wire(request_id).to_string();
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            self.pending.lock().remove(&request_id);
            return Err(ChannelError::Io(e));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The reader dropped our sender: the socket is gone.
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(ChannelError::Timeout)
            }
        }
    }

    /// Read one property, failing if the player reports an error.
    pub async fn get_property(&mut self, property: Property) -> Result<Value, ChannelError> {
        let reply = self.send(PlayerCommand::GetProperty(property)).await?;
        if reply.is_success() {
            Ok(reply.data)
        } else {
            Err(ChannelError::Command(reply.error))
        }
    }

    pub async fn set_property(
        &mut self,
        property: Property,
        value: Value,
    ) -> Result<(), ChannelError> {
        let reply = self.send(PlayerCommand::SetProperty(property, value)).await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(ChannelError::Command(reply.error))
        }
    }

    /// Register the property observers the controller relies on. The player
    /// pushes a change notification whenever any of them moves.
    pub async fn register_observers(&mut self) -> Result<(), ChannelError> {
        for (id, property) in [
            (OBS_PAUSE, Property::Pause),
            (OBS_TIME_POS, Property::TimePos),
            (OBS_DURATION, Property::Duration),
        ] {
            self.send(PlayerCommand::ObserveProperty { id, property })
                .await?;
        }
        Ok(())
    }

    /// Take the event stream. Yields `None` once taken before.
    pub fn observe(&mut self) -> Option<mpsc::Receiver<PlayerEvent>> {
        self.events.take()
    }

    /// Close the channel and remove the socket file. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.pending.lock().clear();
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn dial(socket_path: &Path) -> Result<UnixStream, ChannelError> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        if socket_path.exists() {
            match UnixStream::connect(socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(attempt, "control socket connect failed: {e}");
                }
            }
        }
        if attempt < CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
        }
    }
    Err(ChannelError::Unavailable(socket_path.to_path_buf()))
}

async fn read_loop(
    read_half: OwnedReadHalf,
    pending: PendingReplies,
    events: mpsc::Sender<PlayerEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Incoming::Reply(reply)) => {
                    if let Some(id) = reply.request_id {
                        if let Some(tx) = pending.lock().remove(&id) {
                            let _ = tx.send(reply);
                        }
                    }
                }
                Ok(Incoming::Event(PlayerEvent::Ignored)) => {}
                Ok(Incoming::Event(event)) => {
                    // Never let a slow consumer stall reply routing; the
                    // property poll refreshes anything dropped here.
                    if let Err(mpsc::error::TrySendError::Closed(_)) = events.try_send(event) {
                        break;
                    }
                }
                Err(e) => warn!("discarding malformed player message: {e}"),
            },
            Ok(None) => {
                trace!("control socket reached eof");
                break;
            }
            Err(e) => {
                debug!("control socket read failed: {e}");
                break;
            }
        }
    }

    // Dropping the pending senders fails outstanding sends with Closed.
    pending.lock().clear();
}
