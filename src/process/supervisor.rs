//! Supervision of the stdio child process.
//!
//! A single lifecycle task owns the child for as long as the supervisor is
//! started. Each pass of its loop spawns one instance, routes the framed
//! stdout to the correlator, waits for the exit, fails everything still
//! pending, and then decides whether to restart. Requests reach the child
//! through a per-instance queue drained by a writer task, so a child that
//! stops reading never blocks a caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ChildCommand, ExitKind, ProcessState, RestartPolicy, SpawnError};
use crate::rpc::{
    frame_stream, response_id, BridgeError, Correlator, JsonLinesCodec, RequestId,
    DEFAULT_MAX_LINE_BYTES,
};

/// Default grace period between SIGTERM and a forced kill.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to keep reading output the child wrote just before exiting.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Request lines that may wait for the writer task before `send` blocks.
const WRITE_QUEUE_DEPTH: usize = 64;

/// A serialized request waiting to be written to the child.
#[derive(Debug)]
struct Outgoing {
    id: RequestId,
    line: Vec<u8>,
}

#[derive(Debug, Default)]
struct Control {
    task: Option<JoinHandle<()>>,
    pid: Option<u32>,
    /// Set by `stop`; suppresses restarts and further spawns.
    stopping: bool,
    /// Cancels a restart that is waiting out its delay.
    stop: CancellationToken,
    /// Forces the current instance down.
    kill: CancellationToken,
    instance: u64,
    restarts: u32,
}

/// A spawned instance, owned by the lifecycle task.
struct Instance {
    id: u64,
    child: Child,
    stdout: ChildStdout,
    kill: CancellationToken,
    /// Stops the writer task once the instance has exited.
    input_closed: CancellationToken,
}

/// Owns the child process and the queue to its stdin.
#[derive(Debug)]
pub struct ProcessSupervisor {
    command: ChildCommand,
    correlator: Arc<Correlator>,
    restart: RestartPolicy,
    max_line_bytes: usize,
    state: watch::Sender<ProcessState>,
    input: Mutex<Option<mpsc::Sender<Outgoing>>>,
    control: Mutex<Control>,
}

impl ProcessSupervisor {
    /// Create a stopped supervisor for `command`, routing responses to
    /// `correlator`.
    #[must_use]
    pub fn new(command: ChildCommand, correlator: Arc<Correlator>) -> Self {
        let (state, _) = watch::channel(ProcessState::Stopped);
        Self {
            command,
            correlator,
            restart: RestartPolicy::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            state,
            input: Mutex::new(None),
            control: Mutex::new(Control::default()),
        }
    }

    /// Set the restart policy (builder pattern).
    #[must_use]
    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Set the longest accepted output line (builder pattern).
    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn input(&self) -> MutexGuard<'_, Option<mpsc::Sender<Outgoing>>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    #[must_use]
    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Whether a child is running and accepting requests.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// PID of the current instance, if one is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.control().pid
    }

    /// Number of automatic restarts since the last `start`.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.control().restarts
    }

    fn transition(&self, to: ProcessState) {
        let from = self.state.send_replace(to);
        if from != to {
            tracing::debug!(from = ?from, to = ?to, "Process state transition");
        }
    }

    /// Spawn the first instance and begin supervising it.
    ///
    /// Returns once the first spawn has succeeded or failed.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError::AlreadyRunning` if supervision is active, or the
    /// spawn failure of the first instance.
    pub async fn start(self: &Arc<Self>) -> Result<(), SpawnError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut control = self.control();
            if control.task.as_ref().is_some_and(|task| !task.is_finished()) {
                return Err(SpawnError::AlreadyRunning);
            }
            control.stopping = false;
            control.stop = CancellationToken::new();
            control.kill = CancellationToken::new();
            control.restarts = 0;
            control.task = Some(tokio::spawn(Arc::clone(self).lifecycle(ready_tx)));
        }

        ready_rx.await.unwrap_or(Err(SpawnError::Cancelled))
    }

    /// Stop supervising: terminate the child and cancel pending restarts.
    ///
    /// Sends SIGTERM (a kill on other platforms) and escalates to a kill if
    /// the child is still alive after `grace`. Never triggers a restart.
    pub async fn stop(&self, grace: Duration) {
        let (task, pid, kill) = {
            let mut control = self.control();
            control.stopping = true;
            control.stop.cancel();
            (control.task.take(), control.pid, control.kill.clone())
        };

        let Some(mut task) = task else {
            return;
        };

        if let Some(pid) = pid {
            tracing::info!(pid, "Stopping child process");
            terminate(pid, &kill);
        }

        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Child did not exit in time, killing"
            );
            kill.cancel();
            let _ = task.await;
        }
    }

    /// Queue one serialized request line for the child.
    ///
    /// Returns once the line is queued; waits only while the queue is full.
    /// If the write itself fails, the pending entry for `id` is rejected
    /// with `BridgeError::WriteFailed`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ProcessUnavailable` if there is no healthy
    /// child, or `BridgeError::WriteFailed` if the child's input is closed.
    pub async fn send(&self, id: RequestId, line: Vec<u8>) -> Result<(), BridgeError> {
        if !self.is_healthy() {
            return Err(BridgeError::ProcessUnavailable);
        }

        let queue = self.input().clone().ok_or(BridgeError::ProcessUnavailable)?;
        queue
            .send(Outgoing { id, line })
            .await
            .map_err(|_| BridgeError::WriteFailed("child input is closed".to_string()))
    }

    async fn lifecycle(self: Arc<Self>, ready: oneshot::Sender<Result<(), SpawnError>>) {
        let mut ready = Some(ready);

        loop {
            let instance = match self.spawn_instance().await {
                Ok(instance) => {
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Ok(()));
                    }
                    instance
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        program = %self.command.program(),
                        "Failed to spawn child process"
                    );
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(Err(e));
                    }
                    break;
                }
            };

            let exit = self.run_instance(instance).await;
            self.handle_exit(exit);

            let (stopping, restarts, stop) = {
                let control = self.control();
                (control.stopping, control.restarts, control.stop.clone())
            };
            if stopping {
                break;
            }
            if !self.restart.should_restart(exit, restarts) {
                tracing::info!(%exit, restarts, "Child process will not be restarted");
                break;
            }

            tracing::warn!(
                %exit,
                delay_ms = u64::try_from(self.restart.delay.as_millis()).unwrap_or(u64::MAX),
                "Restarting child process"
            );
            tokio::select! {
                () = tokio::time::sleep(self.restart.delay) => {}
                () = stop.cancelled() => break,
            }
            self.control().restarts += 1;
        }
    }

    /// Stopped -> Starting -> Running.
    async fn spawn_instance(&self) -> Result<Instance, SpawnError> {
        self.transition(ProcessState::Starting);

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.abort_start(&e);
                return Err(e);
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            let e = SpawnError::Io(std::io::Error::other("child stdio was not captured"));
            self.abort_start(&e);
            return Err(e);
        };

        let pid = child.id();
        let registered = {
            let mut control = self.control();
            if control.stopping {
                None
            } else {
                control.pid = pid;
                control.instance += 1;
                Some((control.instance, control.kill.clone()))
            }
        };
        let Some((id, kill)) = registered else {
            let _ = child.start_kill();
            self.abort_start(&SpawnError::Cancelled);
            return Err(SpawnError::Cancelled);
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, id));
        }
        let (queue, requests) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let input_closed = CancellationToken::new();
        tokio::spawn(write_requests(
            stdin,
            requests,
            Arc::clone(&self.correlator),
            input_closed.clone(),
            id,
        ));
        *self.input() = Some(queue);
        self.transition(ProcessState::Running);

        tracing::info!(
            pid,
            instance = id,
            program = %self.command.program(),
            "Child process started"
        );

        Ok(Instance {
            id,
            child,
            stdout,
            kill,
            input_closed,
        })
    }

    fn abort_start(&self, err: &SpawnError) {
        self.transition(ProcessState::Stopped);
        self.correlator
            .reject_all(&BridgeError::ChildExited(format!("spawn failed: {err}")));
    }

    /// Route output until the instance exits, then drain what is left.
    async fn run_instance(&self, instance: Instance) -> ExitKind {
        let Instance {
            id,
            mut child,
            stdout,
            kill,
            input_closed,
        } = instance;

        let codec = JsonLinesCodec::with_max_line_bytes(self.max_line_bytes);
        let frames = frame_stream(stdout, codec);
        tokio::pin!(frames);

        let mut stdout_open = true;
        let mut killed = false;

        let status = loop {
            tokio::select! {
                frame = frames.next(), if stdout_open => match frame {
                    Some(message) => self.route(message),
                    None => stdout_open = false,
                },
                status = child.wait() => break status,
                () = kill.cancelled(), if !killed => {
                    killed = true;
                    tracing::warn!(instance = id, "Force killing child process");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(instance = id, error = %e, "Failed to kill child process");
                    }
                }
            }
        };
        input_closed.cancel();

        if stdout_open {
            let drain = async {
                while let Some(message) = frames.next().await {
                    self.route(message);
                }
            };
            if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
                tracing::debug!(instance = id, "Child stdout still open after exit");
            }
        }

        let exit = match status {
            Ok(status) => ExitKind::from_status(status),
            Err(e) => {
                tracing::warn!(instance = id, error = %e, "Failed to wait for child process");
                ExitKind::Unknown
            }
        };
        tracing::info!(instance = id, %exit, "Child process exited");
        exit
    }

    fn route(&self, message: Value) {
        match response_id(&message) {
            Some(id) => {
                self.correlator.resolve(&id, message);
            }
            None => {
                tracing::debug!(%message, "Ignoring child message without a usable id");
            }
        }
    }

    /// Running -> Stopped: mark unhealthy, release the input queue, fail
    /// pending work.
    fn handle_exit(&self, exit: ExitKind) {
        self.transition(ProcessState::Stopped);
        self.control().pid = None;
        *self.input() = None;
        self.correlator
            .reject_all(&BridgeError::ChildExited(exit.to_string()));
    }
}

/// Write queued requests to the child's stdin, one line at a time.
///
/// Lines still queued when the instance exits are dropped; their entries
/// are rejected by the exit handling.
async fn write_requests(
    mut stdin: ChildStdin,
    mut requests: mpsc::Receiver<Outgoing>,
    correlator: Arc<Correlator>,
    input_closed: CancellationToken,
    instance: u64,
) {
    loop {
        let outgoing = tokio::select! {
            biased;
            () = input_closed.cancelled() => break,
            next = requests.recv() => match next {
                Some(outgoing) => outgoing,
                None => break,
            },
        };

        let written = tokio::select! {
            () = input_closed.cancelled() => break,
            result = write_line(&mut stdin, &outgoing.line) => result,
        };
        if let Err(e) = written {
            tracing::warn!(
                instance,
                id = %outgoing.id,
                error = %e,
                "Failed to write request to child"
            );
            let err = BridgeError::WriteFailed(e.to_string());
            correlator.reject(&outgoing.id, err.clone());
            requests.close();
            while let Ok(queued) = requests.try_recv() {
                correlator.reject(&queued.id, err.clone());
            }
            break;
        }
        tracing::trace!(instance, id = %outgoing.id, "Wrote request to child");
    }
    tracing::debug!(instance, "Stopped writing to child stdin");
}

async fn write_line(stdin: &mut ChildStdin, line: &[u8]) -> std::io::Result<()> {
    stdin.write_all(line).await?;
    stdin.flush().await
}

async fn log_stderr(stderr: ChildStderr, instance: u64) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "child_stderr", instance, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(instance, error = %e, "Stopped reading child stderr");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn terminate(pid: u32, _kill: &CancellationToken) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
    if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32, kill: &CancellationToken) {
    kill.cancel();
}
