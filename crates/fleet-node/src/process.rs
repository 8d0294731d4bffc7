//! Spawning and signalling server processes.
//!
//! The [`ProcessLauncher`] trait is the seam between the supervisor and the
//! operating system. [`OsLauncher`] runs real processes; the `mock` module
//! provides an in-memory launcher for tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleet_core::ParticipantId;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::error::{NodeError, Result};

/// How a running process is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    /// Ask the process to exit (SIGTERM).
    Graceful,
    /// Kill the process immediately.
    Force,
}

/// Everything needed to spawn one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Identity of the server.
    pub id: ParticipantId,
    /// Argument vector; the first element is the program.
    pub argv: Vec<String>,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Environment entries added to the inherited environment.
    pub env: BTreeMap<String, String>,
}

/// Handle to a spawned process.
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Whether the process is still running.
    fn is_alive(&self) -> bool;

    /// Ask for the process to be terminated. Does not wait for the exit.
    fn kill(&self, mode: KillMode);
}

/// A freshly spawned process.
pub struct LaunchedProcess {
    /// Handle used to signal the process.
    pub handle: Box<dyn ProcessHandle>,
    /// Fires with the exit code (if any) once the process has exited.
    pub exited: oneshot::Receiver<Option<i32>>,
}

/// Spawns server processes.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn a process.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Spawn` if the process cannot be started.
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess>;
}

/// Launches real OS processes with tokio.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl OsLauncher {
    /// Create a new launcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for OsLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| NodeError::Spawn("empty command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NodeError::Spawn(format!("{program}: {e}")))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(request.id, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(request.id, stderr));
        }

        let pid = child.id();
        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(watch(request.id, child, kill_rx, Arc::clone(&alive), exit_tx));

        Ok(LaunchedProcess {
            handle: Box::new(OsProcessHandle {
                pid,
                alive,
                kill_tx,
            }),
            exited: exit_rx,
        })
    }
}

struct OsProcessHandle {
    pid: Option<u32>,
    alive: Arc<AtomicBool>,
    kill_tx: mpsc::UnboundedSender<KillMode>,
}

impl ProcessHandle for OsProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&self, mode: KillMode) {
        // The watcher is gone once the process has exited.
        let _ = self.kill_tx.send(mode);
    }
}

/// Own the child until it exits, applying kill requests as they arrive.
async fn watch(
    id: ParticipantId,
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<KillMode>,
    alive: Arc<AtomicBool>,
    exit_tx: oneshot::Sender<Option<i32>>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(mode) = kill_rx.recv() => match mode {
                KillMode::Force => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(server = %id, error = %e, "Failed to kill process");
                    }
                }
                KillMode::Graceful => terminate(id, &mut child),
            },
        }
    };

    alive.store(false, Ordering::SeqCst);
    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(server = %id, error = %e, "Failed to wait for process");
            None
        }
    };
    tracing::debug!(server = %id, ?code, "Process exited");
    let _ = exit_tx.send(code);
}

#[cfg(unix)]
fn terminate(id: ParticipantId, child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::warn!(server = %id, error = %e, "Failed to signal process");
    }
}

#[cfg(not(unix))]
fn terminate(id: ParticipantId, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(server = %id, error = %e, "Failed to kill process");
    }
}

async fn forward_output<R: AsyncRead + Unpin>(id: ParticipantId, output: R) {
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %id, "{line}");
    }
}

/// An in-memory launcher for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    type ExitSlot = Arc<Mutex<Option<oneshot::Sender<Option<i32>>>>>;

    #[derive(Clone)]
    struct MockProcess {
        alive: Arc<AtomicBool>,
        kills: Arc<Mutex<Vec<KillMode>>>,
        exit: ExitSlot,
        exit_on_kill: bool,
    }

    impl MockProcess {
        fn exit(&self, code: Option<i32>) -> bool {
            let Some(tx) = self.exit.lock().take() else {
                return false;
            };
            self.alive.store(false, Ordering::SeqCst);
            let _ = tx.send(code);
            true
        }
    }

    impl ProcessHandle for MockProcess {
        fn pid(&self) -> Option<u32> {
            None
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn kill(&self, mode: KillMode) {
            self.kills.lock().push(mode);
            if self.exit_on_kill {
                self.exit(None);
            }
        }
    }

    /// A launcher that records requests instead of spawning processes.
    #[derive(Default)]
    pub struct MockLauncher {
        launches: Mutex<Vec<LaunchRequest>>,
        processes: Mutex<HashMap<ParticipantId, Vec<MockProcess>>>,
        fail_spawn: AtomicBool,
        linger_on_kill: AtomicBool,
    }

    impl MockLauncher {
        /// Create a new mock launcher. Killed processes exit immediately.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent launches fail.
        pub fn set_fail_spawn(&self, fail: bool) {
            self.fail_spawn.store(fail, Ordering::SeqCst);
        }

        /// Keep subsequently launched processes alive after a kill.
        pub fn set_linger_on_kill(&self, linger: bool) {
            self.linger_on_kill.store(linger, Ordering::SeqCst);
        }

        /// Every launch request received, in order.
        #[must_use]
        pub fn launches(&self) -> Vec<LaunchRequest> {
            self.launches.lock().clone()
        }

        /// Number of launch requests received.
        #[must_use]
        pub fn launch_count(&self) -> usize {
            self.launches.lock().len()
        }

        fn latest(&self, id: &ParticipantId) -> Option<MockProcess> {
            self.processes.lock().get(id).and_then(|p| p.last()).cloned()
        }

        /// Kill requests received by the latest process of `id`.
        #[must_use]
        pub fn kills(&self, id: &ParticipantId) -> Vec<KillMode> {
            self.latest(id)
                .map(|p| p.kills.lock().clone())
                .unwrap_or_default()
        }

        /// Whether the latest process of `id` is alive.
        #[must_use]
        pub fn is_alive(&self, id: &ParticipantId) -> bool {
            self.latest(id).is_some_and(|p| p.is_alive())
        }

        /// Make the latest process of `id` exit on its own. Returns false if
        /// it had already exited.
        pub fn exit(&self, id: &ParticipantId, code: Option<i32>) -> bool {
            self.latest(id).is_some_and(|p| p.exit(code))
        }

        /// Make the `generation`-th process launched for `id` (0 is the first)
        /// exit on its own. Returns false if it had already exited.
        pub fn exit_generation(
            &self,
            id: &ParticipantId,
            generation: usize,
            code: Option<i32>,
        ) -> bool {
            let process = self
                .processes
                .lock()
                .get(id)
                .and_then(|p| p.get(generation))
                .cloned();
            process.is_some_and(|p| p.exit(code))
        }
    }

    impl ProcessLauncher for MockLauncher {
        fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess> {
            self.launches.lock().push(request.clone());
            if self.fail_spawn.load(Ordering::SeqCst) {
                return Err(NodeError::Spawn("mock spawn failure".to_string()));
            }

            let (exit_tx, exit_rx) = oneshot::channel();
            let process = MockProcess {
                alive: Arc::new(AtomicBool::new(true)),
                kills: Arc::new(Mutex::new(Vec::new())),
                exit: Arc::new(Mutex::new(Some(exit_tx))),
                exit_on_kill: !self.linger_on_kill.load(Ordering::SeqCst),
            };
            self.processes
                .lock()
                .entry(request.id)
                .or_default()
                .push(process.clone());

            Ok(LaunchedProcess {
                handle: Box::new(process),
                exited: exit_rx,
            })
        }
    }
}
