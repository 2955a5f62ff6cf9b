use crate::error::SessionError;
use crate::port::PlayerPort;
use crate::state::{PlaybackState, SessionView, StateEdge};
use control_primitives::{
    MediaName, OutputRoute, SeekPosition, SkipDelta, ValidationError, Volume,
};
use player_protocol::{EndReason, PlayerCommand, PlayerEvent, Property, Reply};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Ops waiting behind the in-flight one before callers see `Busy`.
pub const OP_QUEUE_DEPTH: usize = 8;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const LIVENESS_INTERVAL: Duration = Duration::from_secs(2);
/// A single channel hiccup is transient; only a run of them condemns the
/// session.
const POLL_FAILURE_LIMIT: u32 = 3;

/// A validated operation. Invalid requests never get this far.
#[derive(Debug)]
pub enum SessionOp {
    Start(MediaName),
    Resume,
    Pause,
    Stop,
    Seek(SeekPosition),
    Skip(SkipDelta),
    SetVolume(Volume),
    SetRoute(OutputRoute),
}

struct OpEnvelope {
    op: SessionOp,
    reply: oneshot::Sender<Result<SessionView, SessionError>>,
}

/// Cloneable front door to the controller loop. Ops are serialized through a
/// bounded queue; status reads come from the last published snapshot and
/// never wait on an in-flight command.
#[derive(Clone)]
pub struct SessionHandle {
    ops: mpsc::Sender<OpEnvelope>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub async fn start(&self, name: MediaName) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::Start(name)).await
    }

    pub async fn resume(&self) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::Resume).await
    }

    pub async fn pause(&self) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::Pause).await
    }

    pub async fn stop(&self) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::Stop).await
    }

    pub async fn seek(&self, position: SeekPosition) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::Seek(position)).await
    }

    pub async fn skip(&self, delta: SkipDelta) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::Skip(delta)).await
    }

    pub async fn set_volume(&self, volume: Volume) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::SetVolume(volume)).await
    }

    pub async fn set_route(&self, route: OutputRoute) -> Result<SessionView, SessionError> {
        self.submit(SessionOp::SetRoute(route)).await
    }

    /// The last-settled snapshot. Never fails on a live controller and never
    /// blocks behind an in-flight command.
    pub fn status(&self) -> SessionView {
        self.view.borrow().clone()
    }

    async fn submit(&self, op: SessionOp) -> Result<SessionView, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .try_send(OpEnvelope { op, reply: tx })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SessionError::Busy,
                mpsc::error::TrySendError::Closed(_) => SessionError::ControllerClosed,
            })?;
        rx.await.map_err(|_| SessionError::ControllerClosed)?
    }
}

/// Spawn the controller loop and hand back its front door.
pub fn spawn<P: PlayerPort + 'static>(
    port: P,
    media_dir: PathBuf,
    volume: Volume,
    route: OutputRoute,
) -> SessionHandle {
    spawn_with_depth(port, media_dir, volume, route, OP_QUEUE_DEPTH)
}

fn spawn_with_depth<P: PlayerPort + 'static>(
    port: P,
    media_dir: PathBuf,
    volume: Volume,
    route: OutputRoute,
    depth: usize,
) -> SessionHandle {
    let (op_tx, op_rx) = mpsc::channel(depth);
    let controller = Controller {
        port,
        media_dir,
        state: PlaybackState::Idle,
        current: None,
        position: 0.0,
        duration: 0.0,
        volume,
        route,
        last_error: None,
        poll_failures: 0,
        fresh_events: None,
        view_tx: watch::channel(SessionView {
            state: PlaybackState::Idle.label().to_string(),
            file: None,
            position: 0.0,
            duration: 0.0,
            volume: volume.get(),
            route: route.to_string(),
            last_error: None,
        })
        .0,
    };
    let view_rx = controller.view_tx.subscribe();
    tokio::spawn(controller.run(op_rx));

    SessionHandle {
        ops: op_tx,
        view: view_rx,
    }
}

/// Single owner of the channel and the state machine. Poll ticks, liveness
/// ticks, and player events all arrive here as inputs; nothing mutates the
/// session from outside.
struct Controller<P: PlayerPort> {
    port: P,
    media_dir: PathBuf,
    state: PlaybackState,
    current: Option<MediaName>,
    position: f64,
    duration: f64,
    volume: Volume,
    route: OutputRoute,
    last_error: Option<String>,
    poll_failures: u32,
    /// Event stream from the most recent launch, picked up by `run`.
    fresh_events: Option<mpsc::Receiver<PlayerEvent>>,
    view_tx: watch::Sender<SessionView>,
}

impl<P: PlayerPort> Controller<P> {
    async fn run(mut self, mut ops: mpsc::Receiver<OpEnvelope>) {
        let mut events: Option<mpsc::Receiver<PlayerEvent>> = None;

        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("playback controller started");

        loop {
            tokio::select! {
                envelope = ops.recv() => match envelope {
                    Some(OpEnvelope { op, reply }) => {
                        let result = self.handle_op(op).await;
                        if let Some(rx) = self.fresh_events.take() {
                            events = Some(rx);
                        } else if !self.state.has_player() {
                            events = None;
                        }
                        self.publish();
                        let _ = reply.send(result);
                    }
                    None => break,
                },
                event = recv_event(&mut events) => match event {
                    Some(event) => {
                        self.handle_event(event);
                        self.publish();
                    }
                    None => events = None,
                },
                _ = poll.tick() => self.poll_properties().await,
                _ = liveness.tick() => {
                    if self.probe_liveness().await {
                        events = None;
                    }
                }
            }
        }

        info!("playback controller shutting down");
        self.port.shutdown(true).await;
    }

    // ── dispatch ──

    async fn handle_op(&mut self, op: SessionOp) -> Result<SessionView, SessionError> {
        debug!(?op, state = self.state.label(), "dispatching");
        match op {
            SessionOp::Start(name) => self.start_session(name, None).await,
            SessionOp::Resume => self.set_pause(false).await,
            SessionOp::Pause => self.set_pause(true).await,
            SessionOp::Stop => self.stop_session().await,
            SessionOp::Seek(position) => self.seek_to(position).await,
            SessionOp::Skip(delta) => self.skip_by(delta).await,
            SessionOp::SetVolume(volume) => self.apply_volume(volume).await,
            SessionOp::SetRoute(route) => self.change_route(route).await,
        }
    }

    async fn start_session(
        &mut self,
        name: MediaName,
        resume_at: Option<f64>,
    ) -> Result<SessionView, SessionError> {
        let path = self.media_dir.join(name.as_str());
        if !path.is_file() {
            return Err(ValidationError::MediaNotFound(name.to_string()).into());
        }

        // A new file never hot-swaps onto a running process; the player binds
        // its output device and file at spawn time.
        self.teardown(true).await;

        self.apply_edge(StateEdge::Start);
        self.last_error = None;
        self.publish();

        match self.port.launch(&path, self.route, self.volume).await {
            Ok(events) => {
                self.fresh_events = Some(events);
                self.apply_edge(StateEdge::ChannelReady);
                self.current = Some(name);
                self.position = resume_at.unwrap_or(0.0);
                self.duration = 0.0;
                self.poll_failures = 0;
                self.apply_edge(StateEdge::PlayLoaded);

                if let Some(position) = resume_at {
                    let _ = self.port.command(PlayerCommand::SeekAbsolute(position)).await;
                    self.resync_audio().await;
                }

                Ok(self.view())
            }
            Err(e) => {
                let reason = e.to_string();
                self.apply_edge(StateEdge::StartupFailed(reason.clone()));
                self.last_error = Some(reason);
                self.port.shutdown(false).await;
                Err(e.into())
            }
        }
    }

    async fn stop_session(&mut self) -> Result<SessionView, SessionError> {
        // Stopping an already-idle session is a no-op, not an error.
        if self.state != PlaybackState::Idle {
            self.teardown(true).await;
        }
        Ok(self.view())
    }

    async fn set_pause(&mut self, pause: bool) -> Result<SessionView, SessionError> {
        if !self.state.accepts_transport_commands() {
            return Err(SessionError::NoActiveSession);
        }

        self.command_ok(PlayerCommand::SetProperty(Property::Pause, Value::Bool(pause)))
            .await?;

        // Caller-intent edge; already being in the requested state is fine.
        match (pause, &self.state) {
            (true, PlaybackState::Playing) => self.apply_edge(StateEdge::Pause),
            (false, PlaybackState::Paused) => self.apply_edge(StateEdge::Resume),
            _ => {}
        }

        Ok(self.view())
    }

    async fn seek_to(&mut self, position: SeekPosition) -> Result<SessionView, SessionError> {
        if !self.state.accepts_transport_commands() {
            return Err(SessionError::NoActiveSession);
        }

        self.command_ok(PlayerCommand::SeekAbsolute(position.seconds()))
            .await?;
        self.resync_audio().await;
        self.position = position.seconds();
        Ok(self.view())
    }

    async fn skip_by(&mut self, delta: SkipDelta) -> Result<SessionView, SessionError> {
        if !self.state.accepts_transport_commands() {
            return Err(SessionError::NoActiveSession);
        }
        if delta.is_noop() {
            return Ok(self.view());
        }

        self.command_ok(PlayerCommand::SeekRelative(delta.seconds()))
            .await?;
        self.resync_audio().await;
        self.position = (self.position + delta.seconds()).max(0.0);
        Ok(self.view())
    }

    async fn apply_volume(&mut self, volume: Volume) -> Result<SessionView, SessionError> {
        if !self.state.accepts_transport_commands() {
            return Err(SessionError::NoActiveSession);
        }

        self.command_ok(PlayerCommand::SetProperty(
            Property::Volume,
            json!(volume.get()),
        ))
        .await?;
        self.volume = volume;
        Ok(self.view())
    }

    async fn change_route(&mut self, route: OutputRoute) -> Result<SessionView, SessionError> {
        self.route = route;

        // The connector is bound at spawn time, so a live session restarts on
        // the same file and seeks back to where it was.
        if self.state.accepts_transport_commands() {
            if let Some(name) = self.current.clone() {
                let resume_at = (self.position > 0.0).then_some(self.position);
                return self.start_session(name, resume_at).await;
            }
        }

        Ok(self.view())
    }

    // ── player events (channel-owned edges) ──

    fn handle_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::PauseChanged(true) => {
                if self.state == PlaybackState::Playing {
                    self.apply_edge(StateEdge::Pause);
                }
            }
            PlayerEvent::PauseChanged(false) => {
                if self.state == PlaybackState::Paused {
                    self.apply_edge(StateEdge::Resume);
                }
            }
            PlayerEvent::PositionChanged(Some(position)) => self.position = position,
            PlayerEvent::PositionChanged(None) => {}
            PlayerEvent::DurationChanged(Some(duration)) => self.duration = duration,
            PlayerEvent::DurationChanged(None) => {}
            PlayerEvent::EndOfFile(reason) => {
                if self.state.accepts_transport_commands() {
                    if reason == EndReason::Error {
                        self.last_error = Some("playback ended with an error".to_string());
                    }
                    self.apply_edge(StateEdge::EndOfFile);
                    self.current = None;
                    self.position = 0.0;
                    self.duration = 0.0;
                }
            }
            PlayerEvent::FileLoaded => {}
            PlayerEvent::Ignored => {}
        }
    }

    // ── periodic tasks ──

    /// Refresh continuous values. Never touches the enumerated state on
    /// success; those edges belong to the dispatcher and the event stream.
    async fn poll_properties(&mut self) {
        if !self.state.accepts_transport_commands() {
            return;
        }

        match self.port.command(PlayerCommand::GetProperty(Property::TimePos)).await {
            Ok(reply) => {
                self.poll_failures = 0;
                if let Some(position) = reply.data.as_f64() {
                    self.position = position;
                }
            }
            Err(e) => {
                self.note_poll_failure(e.to_string());
                return;
            }
        }

        if let Ok(reply) = self.port.command(PlayerCommand::GetProperty(Property::Duration)).await {
            if let Some(duration) = reply.data.as_f64() {
                self.duration = duration;
            }
        }
        if let Ok(reply) = self.port.command(PlayerCommand::GetProperty(Property::Volume)).await {
            if let Some(level) = reply.data.as_f64() {
                if let Ok(volume) = Volume::new(level.round() as i64) {
                    self.volume = volume;
                }
            }
        }

        self.publish();
    }

    fn note_poll_failure(&mut self, reason: String) {
        self.poll_failures += 1;
        warn!(failures = self.poll_failures, "property poll failed: {reason}");
        if self.poll_failures >= POLL_FAILURE_LIMIT {
            let reason = format!("control channel lost: {reason}");
            self.apply_edge(StateEdge::ProcessDied(reason.clone()));
            self.last_error = Some(reason);
            self.publish();
        }
    }

    /// Detects an unexpected exit without waiting for a command to trip over
    /// it. Returns true when the player is gone.
    async fn probe_liveness(&mut self) -> bool {
        if !self.state.has_player() || self.port.is_alive() {
            return false;
        }

        if self.state == PlaybackState::Stopping {
            self.apply_edge(StateEdge::ProcessExited);
        } else {
            let reason = "player process exited unexpectedly".to_string();
            warn!("{reason}");
            self.apply_edge(StateEdge::ProcessDied(reason.clone()));
            self.last_error = Some(reason);
        }

        // Reap the corpse and clear the stale socket. Never auto-restart;
        // the caller decides the retry policy.
        self.port.shutdown(false).await;
        self.current = None;
        self.publish();
        true
    }

    // ── helpers ──

    async fn teardown(&mut self, graceful: bool) {
        if self.state != PlaybackState::Idle {
            self.apply_edge(StateEdge::StopRequested);
            self.publish();
            self.port.shutdown(graceful).await;
            self.apply_edge(StateEdge::ProcessExited);
        }
        self.current = None;
        self.position = 0.0;
        self.duration = 0.0;
    }

    async fn command_ok(&mut self, command: PlayerCommand) -> Result<Reply, SessionError> {
        let reply = self.port.command(command).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(SessionError::Channel(player_channel::ChannelError::Command(
                reply.error,
            )))
        }
    }

    async fn resync_audio(&mut self) {
        // Best effort: a failed resync is not a failed seek.
        if let Err(e) = self.port.command(PlayerCommand::ReloadAudio).await {
            debug!("audio resync failed: {e}");
        }
    }

    fn apply_edge(&mut self, edge: StateEdge) {
        match self.state.apply(&edge) {
            Ok(next) => {
                if next != self.state {
                    debug!(from = self.state.label(), to = next.label(), "state transition");
                }
                self.state = next;
            }
            Err(e) => warn!("{e}"),
        }
    }

    fn publish(&self) {
        let _ = self.view_tx.send(self.view());
    }

    fn view(&self) -> SessionView {
        SessionView {
            state: self.state.label().to_string(),
            file: self.current.as_ref().map(|n| n.to_string()),
            position: self.position,
            duration: self.duration,
            volume: self.volume.get(),
            route: self.route.to_string(),
            last_error: self.last_error.clone(),
        }
    }
}

async fn recv_event(events: &mut Option<mpsc::Receiver<PlayerEvent>>) -> Option<PlayerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use player_process::SpawnError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    /// Scripted player port: records launches and commands, answers success,
    /// and lets tests push events or flip liveness.
    #[derive(Clone, Default)]
    struct StubPort {
        alive: Arc<AtomicBool>,
        launches: Arc<Mutex<Vec<PathBuf>>>,
        commands: Arc<Mutex<Vec<PlayerCommand>>>,
        events_tx: Arc<Mutex<Option<mpsc::Sender<PlayerEvent>>>>,
        fail_launch: Arc<Mutex<Option<String>>>,
        /// When set, every command waits for a permit first.
        gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    }

    impl StubPort {
        async fn push_event(&self, event: PlayerEvent) {
            let tx = self.events_tx.lock().clone();
            tx.expect("no live event stream").send(event).await.unwrap();
        }

        fn sent_commands(&self) -> Vec<PlayerCommand> {
            self.commands.lock().clone()
        }
    }

    #[async_trait]
    impl PlayerPort for StubPort {
        async fn launch(
            &mut self,
            media: &std::path::Path,
            _route: OutputRoute,
            _volume: Volume,
        ) -> Result<mpsc::Receiver<PlayerEvent>, PortError> {
            if let Some(reason) = self.fail_launch.lock().clone() {
                return Err(PortError::Spawn(SpawnError::MissingBinary(reason)));
            }
            self.launches.lock().push(media.to_path_buf());
            self.alive.store(true, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            *self.events_tx.lock() = Some(tx);
            Ok(rx)
        }

        async fn command(&mut self, command: PlayerCommand) -> Result<Reply, PortError> {
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            self.commands.lock().push(command);
            Ok(Reply {
                error: "success".to_string(),
                data: Value::Null,
                request_id: None,
            })
        }

        fn is_alive(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn shutdown(&mut self, _graceful: bool) {
            self.alive.store(false, Ordering::SeqCst);
            *self.events_tx.lock() = None;
        }
    }

    fn media_dir_with(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in files {
            std::fs::write(dir.path().join(name), b"video-bytes").unwrap();
        }
        dir
    }

    fn handle_for(stub: &StubPort, dir: &tempfile::TempDir) -> SessionHandle {
        spawn(
            stub.clone(),
            dir.path().to_path_buf(),
            Volume::default(),
            OutputRoute::Auto,
        )
    }

    async fn settle() {
        // Give the controller loop a chance to drain queued inputs.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn start_plays_an_existing_file() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["movie.mp4"]);
        let handle = handle_for(&stub, &dir);

        let view = handle.start(MediaName::new("movie.mp4").unwrap()).await.unwrap();
        assert_eq!(view.state, "playing");
        assert_eq!(view.file.as_deref(), Some("movie.mp4"));
        assert_eq!(stub.launches.lock().len(), 1);
    }

    #[tokio::test]
    async fn start_missing_file_fails_validation_without_spawning() {
        let stub = StubPort::default();
        let dir = media_dir_with(&[]);
        let handle = handle_for(&stub, &dir);

        let result = handle.start(MediaName::new("missing.mp4").unwrap()).await;
        assert!(matches!(
            result,
            Err(SessionError::Validation(ValidationError::MediaNotFound(_)))
        ));
        assert!(stub.launches.lock().is_empty(), "must never spawn");
        assert_eq!(handle.status().state, "idle");
    }

    #[tokio::test]
    async fn spawn_failure_is_fatal_to_start_and_lands_in_failed() {
        let stub = StubPort::default();
        *stub.fail_launch.lock() = Some("mpv".to_string());
        let dir = media_dir_with(&["movie.mp4"]);
        let handle = handle_for(&stub, &dir);

        let result = handle.start(MediaName::new("movie.mp4").unwrap()).await;
        assert!(matches!(result, Err(SessionError::Spawn(_))));
        assert_eq!(handle.status().state, "failed");
        assert!(handle.status().last_error.is_some());
    }

    #[tokio::test]
    async fn pause_resume_follow_caller_intent() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["movie.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("movie.mp4").unwrap()).await.unwrap();
        let view = handle.pause().await.unwrap();
        assert_eq!(view.state, "paused");
        let view = handle.resume().await.unwrap();
        assert_eq!(view.state, "playing");
    }

    #[tokio::test]
    async fn transport_commands_require_loaded_media() {
        let stub = StubPort::default();
        let dir = media_dir_with(&[]);
        let handle = handle_for(&stub, &dir);

        assert!(matches!(
            handle.pause().await,
            Err(SessionError::NoActiveSession)
        ));
        assert!(matches!(
            handle.seek(SeekPosition::new(10.0).unwrap()).await,
            Err(SessionError::NoActiveSession)
        ));
        assert!(matches!(
            handle.set_volume(Volume::new(50).unwrap()).await,
            Err(SessionError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["movie.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("movie.mp4").unwrap()).await.unwrap();
        let first = handle.stop().await.unwrap();
        assert_eq!(first.state, "idle");
        let second = handle.stop().await.unwrap();
        assert_eq!(second.state, "idle");
    }

    #[tokio::test]
    async fn seek_after_start_applies_in_order_with_resync() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();
        let view = handle.seek(SeekPosition::new(30.0).unwrap()).await.unwrap();
        assert!(view.position >= 30.0);

        let commands = stub.sent_commands();
        let seek_idx = commands
            .iter()
            .position(|c| matches!(c, PlayerCommand::SeekAbsolute(p) if *p == 30.0))
            .expect("seek was sent");
        assert!(
            matches!(commands.get(seek_idx + 1), Some(PlayerCommand::ReloadAudio)),
            "audio resync must directly follow the seek, got {:?}",
            commands
        );
    }

    #[tokio::test]
    async fn zero_skip_is_accepted_without_touching_the_channel() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();
        let before = stub.sent_commands().len();
        handle.skip(SkipDelta::new(0.0).unwrap()).await.unwrap();
        assert_eq!(stub.sent_commands().len(), before);
    }

    #[tokio::test]
    async fn end_of_file_returns_session_to_ready() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();
        stub.push_event(PlayerEvent::EndOfFile(EndReason::Eof)).await;
        settle().await;

        let view = handle.status();
        assert_eq!(view.state, "ready");
        assert_eq!(view.file, None);
    }

    #[tokio::test]
    async fn player_reported_pause_owns_the_edge() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();
        stub.push_event(PlayerEvent::PauseChanged(true)).await;
        settle().await;
        assert_eq!(handle.status().state, "paused");
    }

    #[tokio::test(start_paused = true)]
    async fn crash_is_detected_and_recovery_needs_an_explicit_start() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();

        // The process dies behind the controller's back.
        stub.alive.store(false, Ordering::SeqCst);
        tokio::time::sleep(LIVENESS_INTERVAL * 2).await;

        let view = handle.status();
        assert_eq!(view.state, "failed");
        assert!(view.last_error.is_some());

        // Never auto-restarted: still failed until the caller acts.
        tokio::time::sleep(LIVENESS_INTERVAL * 2).await;
        assert_eq!(handle.status().state, "failed");

        let view = handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();
        assert_eq!(view.state, "playing");
    }

    #[tokio::test]
    async fn route_change_restarts_playback_at_the_old_position() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();
        handle.seek(SeekPosition::new(42.0).unwrap()).await.unwrap();

        let view = handle.set_route(OutputRoute::HdmiA2).await.unwrap();
        assert_eq!(view.state, "playing");
        assert_eq!(view.route, "HDMI-A-2");
        assert_eq!(stub.launches.lock().len(), 2, "must respawn for a new route");

        let commands = stub.sent_commands();
        let relaunch_seek = commands
            .iter()
            .filter(|c| matches!(c, PlayerCommand::SeekAbsolute(p) if *p == 42.0))
            .count();
        assert_eq!(relaunch_seek, 2, "one caller seek, one resume-at seek");
    }

    #[tokio::test]
    async fn route_change_while_idle_only_records_the_route() {
        let stub = StubPort::default();
        let dir = media_dir_with(&[]);
        let handle = handle_for(&stub, &dir);

        let view = handle.set_route(OutputRoute::HdmiA1).await.unwrap();
        assert_eq!(view.state, "idle");
        assert_eq!(view.route, "HDMI-A-1");
        assert!(stub.launches.lock().is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_with_busy_while_status_stays_answerable() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4"]);
        let handle = spawn_with_depth(
            stub.clone(),
            dir.path().to_path_buf(),
            Volume::default(),
            OutputRoute::Auto,
            1,
        );

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();

        // Gate the channel so the next command stays in flight.
        let gate = Arc::new(Semaphore::new(0));
        *stub.gate.lock() = Some(Arc::clone(&gate));

        let in_flight = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.seek(SeekPosition::new(10.0).unwrap()).await })
        };
        settle().await;

        let queued = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.seek(SeekPosition::new(20.0).unwrap()).await })
        };
        settle().await;

        // One in flight, one queued: the next caller is told to retry.
        let rejected = handle.seek(SeekPosition::new(30.0).unwrap()).await;
        assert!(matches!(rejected, Err(SessionError::Busy)));

        // A status read answers immediately from the snapshot.
        assert_eq!(handle.status().state, "playing");

        gate.add_permits(16);
        in_flight.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn new_file_stops_the_old_process_first() {
        let stub = StubPort::default();
        let dir = media_dir_with(&["a.mp4", "b.mp4"]);
        let handle = handle_for(&stub, &dir);

        handle.start(MediaName::new("a.mp4").unwrap()).await.unwrap();
        let view = handle.start(MediaName::new("b.mp4").unwrap()).await.unwrap();

        assert_eq!(view.file.as_deref(), Some("b.mp4"));
        assert_eq!(stub.launches.lock().len(), 2);
    }
}
