use crate::error::SpawnError;
use control_primitives::{OutputRoute, Volume};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How long a terminated player gets to exit before it is killed outright.
pub const TERM_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Which binary to run and any site-specific extra arguments.
#[derive(Debug, Clone)]
pub struct PlayerSpec {
    pub binary: PathBuf,
    pub extra_args: Vec<String>,
}

impl Default for PlayerSpec {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mpv"),
            extra_args: Vec::new(),
        }
    }
}

impl PlayerSpec {
    /// Resolve the player binary on PATH.
    pub fn check_available(&self) -> Result<PathBuf, SpawnError> {
        which::which(&self.binary)
            .map_err(|_| SpawnError::MissingBinary(self.binary.display().to_string()))
    }
}

/// A socket path no other session is using: one per spawn, namespaced by our
/// own pid so stale files from a crashed controller never collide.
pub fn session_socket_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("player-ctl-{}-{}.sock", std::process::id(), n))
}

/// The fixed headless argument set: IPC socket, no window, idle so the
/// process survives end-of-file, DRM video output. The media path is
/// appended last by the caller.
pub fn build_player_args(socket_path: &Path, route: OutputRoute, volume: Volume) -> Vec<String> {
    let mut args = vec![
        "--no-terminal".to_string(),
        "--really-quiet".to_string(),
        format!("--input-ipc-server={}", socket_path.display()),
        "--idle=yes".to_string(),
        "--force-window=no".to_string(),
        "--keep-open=yes".to_string(),
        format!("--volume={}", volume.get()),
        "--vo=gpu".to_string(),
        "--gpu-context=drm".to_string(),
    ];

    if let Some(connector) = route.connector() {
        args.push(format!("--drm-connector={connector}"));
    }

    args.push("--hwdec=auto".to_string());
    args.push("--hwdec-codecs=all".to_string());
    args.push("--video-sync=display-resample".to_string());
    args
}

/// One spawned player process and its socket endpoint.
pub struct PlayerProcess {
    child: Child,
    pid: Option<u32>,
    socket_path: PathBuf,
}

impl PlayerProcess {
    pub fn spawn(
        spec: &PlayerSpec,
        media: &Path,
        socket_path: &Path,
        route: OutputRoute,
        volume: Volume,
    ) -> Result<Self, SpawnError> {
        // A stale socket file would satisfy the connect retry before the new
        // process has bound it.
        let _ = std::fs::remove_file(socket_path);

        let mut command = Command::new(&spec.binary);
        command
            .args(build_player_args(socket_path, route, volume))
            .args(&spec.extra_args)
            .arg(media)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| SpawnError::Launch {
            binary: spec.binary.display().to_string(),
            source,
        })?;

        let pid = child.id();
        info!(?pid, media = %media.display(), "player process spawned");

        Ok(Self {
            child,
            pid,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Lightweight liveness probe.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait up to `grace` for the child to exit on its own. Returns whether
    /// it did.
    pub async fn wait_exit(&mut self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.child.wait()).await.is_ok()
    }

    /// SIGTERM, bounded wait, then SIGKILL. Always removes the socket file.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.is_alive() {
            if let Some(pid) = self.pid {
                // SAFETY: signalling our own child process.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }

            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(status) => debug!(?status, "player exited after SIGTERM"),
                Err(_) => {
                    warn!("player ignored SIGTERM, killing");
                    let _ = self.child.start_kill();
                    let _ = tokio::time::timeout(KILL_GRACE, self.child.wait()).await;
                }
            }
        }

        self.cleanup_socket();
    }

    fn cleanup_socket(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
