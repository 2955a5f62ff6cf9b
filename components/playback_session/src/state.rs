use serde::Serialize;
use thiserror::Error;

/// Authoritative playback state. Nothing outside the controller loop may set
/// it; every change goes through `apply` with evidence for the edge taken.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    /// No player process.
    Idle,
    /// Process spawned, control channel not yet ready.
    Starting,
    /// Channel ready, nothing loaded.
    Ready,
    Playing,
    Paused,
    /// Teardown in progress, waiting for the process to exit.
    Stopping,
    Failed(String),
}

impl PlaybackState {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Starting => "starting",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopping => "stopping",
            PlaybackState::Failed(_) => "failed",
        }
    }

    /// True while a player process belongs to this session.
    pub fn has_player(&self) -> bool {
        matches!(
            self,
            PlaybackState::Starting
                | PlaybackState::Ready
                | PlaybackState::Playing
                | PlaybackState::Paused
                | PlaybackState::Stopping
        )
    }

    /// Transport commands (pause, seek, skip, volume) need loaded media.
    pub fn accepts_transport_commands(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Paused)
    }
}

/// Evidence-bearing transition triggers. Caller-intent edges are applied by
/// the dispatcher, process-exit edges by the liveness probe, and
/// pause/end-of-file edges by the player's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEdge {
    Start,
    ChannelReady,
    StartupFailed(String),
    PlayLoaded,
    Pause,
    Resume,
    StopRequested,
    ProcessExited,
    EndOfFile,
    ProcessDied(String),
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid state transition: {0}")]
pub struct InvalidTransition(pub String);

impl PlaybackState {
    pub fn apply(&self, edge: &StateEdge) -> Result<PlaybackState, InvalidTransition> {
        use PlaybackState::*;

        let next = match (self, edge) {
            (Idle | Failed(_), StateEdge::Start) => Starting,
            (Starting, StateEdge::ChannelReady) => Ready,
            (Starting, StateEdge::StartupFailed(reason)) => Failed(reason.clone()),
            (Ready, StateEdge::PlayLoaded) => Playing,
            (Playing, StateEdge::Pause) => Paused,
            (Paused, StateEdge::Resume) => Playing,
            // Stop tears down from any state that still owns a process, and
            // clears the wreckage of a Failed session.
            (Starting | Ready | Playing | Paused | Failed(_), StateEdge::StopRequested) => Stopping,
            (Stopping, StateEdge::ProcessExited) => Idle,
            (Playing | Paused, StateEdge::EndOfFile) => Ready,
            (_, StateEdge::ProcessDied(reason)) => Failed(reason.clone()),
            (from, edge) => {
                return Err(InvalidTransition(format!("{edge:?} from {from:?}")));
            }
        };

        Ok(next)
    }
}

/// The last-settled snapshot callers read. Status queries never wait on an
/// in-flight command; they see the most recently published view.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub state: String,
    pub file: Option<String>,
    pub position: f64,
    pub duration: f64,
    pub volume: u32,
    pub route: String,
    pub last_error: Option<String>,
}
