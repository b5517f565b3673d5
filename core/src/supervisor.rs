//! Single-session process supervisor.
//!
//! The supervisor owns at most one [`RunSession`]. Its lifecycle is
//! `Idle -> Running -> Exited(code)`, or `Running -> Idle` through [`Supervisor::stop`].
//! Three tasks cooperate per session:
//!
//! * the exit watcher owns the child and publishes its exit code,
//! * the reader runs the [`Demultiplexer`] over the merged output pipe and, on
//!   end-of-stream, reports a natural exit to the console,
//! * the caller drives `start`/`stop`/`status` from the console.
//!
//! Transitions are serialised by the session mutex; `status` only reads a
//! watch channel and never waits on it.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::classifier::SessionMode;
use crate::classifier::TargetSpec;
use crate::classifier::classify_command;
use crate::config::SupervisorConfig;
use crate::demux::Demultiplexer;
use crate::demux::DemuxStats;
use crate::error::Result;
use crate::error::SupervisorError;
use crate::event_log::EventLog;
use crate::provision::Workspace;
use crate::provision::provision;
use crate::sink::ConsoleLine;
use crate::sink::ConsoleSender;
use crate::termination::bind_to_supervisor;
use crate::termination::exit_code;
use crate::termination::request_graceful_stop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Exited(i32),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Running => write!(f, "Running"),
            SessionStatus::Exited(code) => write!(f, "Exited ({code})"),
        }
    }
}

/// How a `stop` call ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    AlreadyExited(i32),
    Graceful(i32),
    Forced,
}

/// What `start` tells the caller about the new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    pub mode: SessionMode,
    pub pid: Option<u32>,
    /// Present iff the session is instrumented.
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusSnapshot {
    session: Option<SessionId>,
    status: SessionStatus,
}

impl StatusSnapshot {
    const IDLE: Self = Self {
        session: None,
        status: SessionStatus::Idle,
    };
}

#[derive(Debug)]
struct RunSession {
    id: SessionId,
    pid: Option<u32>,
    workspace: Option<Workspace>,
    exit_rx: watch::Receiver<Option<i32>>,
    kill_tx: Option<oneshot::Sender<()>>,
    reader: JoinHandle<DemuxStats>,
    reader_done: watch::Receiver<bool>,
    /// Set once `stop` owns the session; silences the natural-exit report.
    stopping: Arc<AtomicBool>,
}

impl RunSession {
    fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }
}

#[derive(Debug)]
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    console: ConsoleSender,
    session: Mutex<Option<RunSession>>,
    status: Arc<watch::Sender<StatusSnapshot>>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, console: ConsoleSender) -> Self {
        let (status, _) = watch::channel(StatusSnapshot::IDLE);
        Self {
            config: Arc::new(config),
            console,
            session: Mutex::new(None),
            status: Arc::new(status),
            next_id: AtomicU64::new(1),
        }
    }

    /// Last observed transition. Never blocks.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().status
    }

    /// Launch `spec` as the single active session.
    ///
    /// A session whose child already exited is reaped first; a running one
    /// makes this fail with [`SupervisorError::AlreadyRunning`].
    pub async fn start(&self, spec: TargetSpec) -> Result<SessionHandle> {
        let mut guard = self.session.lock().await;
        if let Some(active) = guard.as_ref()
            && active.exit_code().is_none()
        {
            return Err(SupervisorError::AlreadyRunning);
        }
        if let Some(finished) = guard.take() {
            debug!(session = %finished.id, "reaping finished session before start");
            self.terminate(finished).await;
            self.status.send_replace(StatusSnapshot::IDLE);
        }

        let mode = classify_command(
            spec.argv(),
            spec.force_instrumented(),
            &self.config.runtime,
        );
        let mut workspace = match mode {
            SessionMode::Instrumented => {
                Some(provision(&self.config).map_err(SupervisorError::Provision)?)
            }
            SessionMode::Raw => None,
        };

        let launched = match self.launch(&spec, mode, workspace.as_ref()) {
            Ok(launched) => launched,
            Err(err) => {
                if let Some(workspace) = workspace.as_mut()
                    && let Err(release_err) = workspace.release()
                {
                    warn!(error = %release_err, "failed to release workspace after failed start");
                }
                return Err(err);
            }
        };

        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let pid = launched.child.id();
        info!(
            session = %id,
            %mode,
            pid,
            program = spec.program(),
            "target started"
        );

        // Publish Running before the watcher can publish Exited.
        self.status.send_replace(StatusSnapshot {
            session: Some(id),
            status: SessionStatus::Running,
        });

        let (exit_rx, kill_tx) = spawn_exit_watcher(id, launched.child, Arc::clone(&self.status));
        let stopping = Arc::new(AtomicBool::new(false));
        let (done_tx, reader_done) = watch::channel(false);
        let reader = tokio::spawn(read_session_output(
            launched.demux,
            launched.output,
            exit_rx.clone(),
            Arc::clone(&stopping),
            self.console.clone(),
            done_tx,
        ));

        let handle = SessionHandle {
            id,
            mode,
            pid,
            log_path: workspace
                .as_ref()
                .map(|workspace| workspace.log_path().to_path_buf()),
        };
        *guard = Some(RunSession {
            id,
            pid,
            workspace,
            exit_rx,
            kill_tx: Some(kill_tx),
            reader,
            reader_done,
            stopping,
        });
        Ok(handle)
    }

    /// End the active session, if any, and return to Idle.
    ///
    /// Sends the graceful signal, waits up to the configured grace period,
    /// then kills. Where no graceful signal exists the kill is immediate.
    /// The workspace is released on every path.
    pub async fn stop(&self) -> StopOutcome {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.take() else {
            return StopOutcome::NotRunning;
        };
        let outcome = self.terminate(session).await;
        self.status.send_replace(StatusSnapshot::IDLE);
        outcome
    }

    /// Block until the active session's output stream has been fully read.
    pub async fn wait(&self) {
        let done = {
            let guard = self.session.lock().await;
            guard.as_ref().map(|session| session.reader_done.clone())
        };
        if let Some(mut done) = done {
            // An error means the reader is gone, which is just as finished.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Exit code of the active session once its child has exited.
    pub async fn exit_code(&self) -> Option<i32> {
        let guard = self.session.lock().await;
        guard.as_ref().and_then(RunSession::exit_code)
    }

    fn launch(
        &self,
        spec: &TargetSpec,
        mode: SessionMode,
        workspace: Option<&Workspace>,
    ) -> Result<Launched> {
        let log = match workspace {
            Some(workspace) => Some(
                EventLog::open(workspace.log_path()).map_err(SupervisorError::Provision)?,
            ),
            None => None,
        };
        let (child, output) = spawn_target(spec, workspace, self.config.inherit_stdin)?;
        let demux = Demultiplexer::new(
            mode,
            self.config.tag.clone(),
            self.config.display.clone(),
            log,
            self.console.clone(),
        );
        Ok(Launched {
            child,
            output,
            demux,
        })
    }

    async fn terminate(&self, mut session: RunSession) -> StopOutcome {
        session.stopping.store(true, Ordering::SeqCst);
        let grace = self.config.grace_period();

        let outcome = match session.exit_code() {
            Some(code) => StopOutcome::AlreadyExited(code),
            None => {
                let signalled = match session.pid.map(request_graceful_stop) {
                    Some(Ok(())) => true,
                    Some(Err(err)) => {
                        debug!(session = %session.id, error = %err, "graceful stop unavailable");
                        false
                    }
                    None => false,
                };
                let graceful = if signalled {
                    timeout(grace, wait_for_exit(&mut session.exit_rx)).await.ok()
                } else {
                    None
                };
                match graceful {
                    Some(code) => StopOutcome::Graceful(code),
                    None => {
                        info!(
                            session = %session.id,
                            grace_ms = grace.as_millis() as u64,
                            signalled,
                            "killing target"
                        );
                        if let Some(kill_tx) = session.kill_tx.take() {
                            let _ = kill_tx.send(());
                        }
                        if timeout(grace, wait_for_exit(&mut session.exit_rx))
                            .await
                            .is_err()
                        {
                            warn!(session = %session.id, "target did not exit after kill");
                        }
                        StopOutcome::Forced
                    }
                }
            }
        };

        // The reader owns the log file; it must be gone before the workspace.
        if timeout(self.config.drain_timeout(), &mut session.reader)
            .await
            .is_err()
        {
            debug!(session = %session.id, "output reader still open; aborting it");
            session.reader.abort();
            let _ = (&mut session.reader).await;
        }

        if let Some(mut workspace) = session.workspace.take()
            && let Err(err) = workspace.release()
        {
            warn!(
                session = %session.id,
                error = %err,
                path = %workspace.path().display(),
                "failed to release instrumentation workspace"
            );
        }

        info!(session = %session.id, ?outcome, "target stopped");
        outcome
    }
}

struct Launched {
    child: Child,
    output: OutputPipe,
    demux: Demultiplexer,
}

/// Read end of the merged output pipe. Readiness-driven on unix so aborting
/// the reader never leaves a thread parked in `read(2)`.
#[cfg(unix)]
type OutputPipe = tokio::net::unix::pipe::Receiver;
#[cfg(windows)]
type OutputPipe = tokio::fs::File;

/// Spawn the target with stdout and stderr sharing one pipe.
fn spawn_target(
    spec: &TargetSpec,
    workspace: Option<&Workspace>,
    inherit_stdin: bool,
) -> Result<(Child, OutputPipe)> {
    let program = spec.program();
    let (reader, writer) = std::io::pipe().map_err(|err| SupervisorError::spawn(program, err))?;
    let output = output_pipe(reader).map_err(|err| SupervisorError::spawn(program, err))?;
    let stderr_writer = writer
        .try_clone()
        .map_err(|err| SupervisorError::spawn(program, err))?;

    let mut command = Command::new(program);
    command
        .args(spec.args())
        .stdin(if inherit_stdin {
            Stdio::inherit()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(stderr_writer))
        .kill_on_drop(true);
    if let Some(workspace) = workspace {
        command.envs(
            workspace
                .env_overlay()
                .iter()
                .map(|(key, value)| (key.as_os_str(), value.as_os_str())),
        );
    }

    bind_to_supervisor(&mut command);

    let child = command
        .spawn()
        .map_err(|err| SupervisorError::spawn(program, err))?;
    // Drop our copies of the write end so the reader sees end-of-stream.
    drop(command);

    Ok((child, output))
}

#[cfg(unix)]
fn output_pipe(reader: std::io::PipeReader) -> std::io::Result<OutputPipe> {
    tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))
}

#[cfg(windows)]
fn output_pipe(reader: std::io::PipeReader) -> std::io::Result<OutputPipe> {
    let handle = std::os::windows::io::OwnedHandle::from(reader);
    Ok(tokio::fs::File::from_std(std::fs::File::from(handle)))
}

/// Owns the child: waits for it, or kills it on request, then publishes the
/// exit code both to the session and, if it is still current, to the status.
fn spawn_exit_watcher(
    id: SessionId,
    mut child: Child,
    status: Arc<watch::Sender<StatusSnapshot>>,
) -> (watch::Receiver<Option<i32>>, oneshot::Sender<()>) {
    let (exit_tx, exit_rx) = watch::channel(None);
    let (kill_tx, kill_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let waited = tokio::select! {
            waited = child.wait() => waited,
            _ = kill_rx => {
                if let Err(err) = child.start_kill() {
                    warn!(session = %id, error = %err, "failed to kill target");
                }
                child.wait().await
            }
        };
        let code = match waited {
            Ok(exit_status) => exit_code(exit_status),
            Err(err) => {
                warn!(session = %id, error = %err, "failed to wait for target");
                -1
            }
        };
        debug!(session = %id, code, "target exited");
        // Status first, so anyone woken by the exit code already sees it.
        status.send_if_modified(|snapshot| {
            if snapshot.session == Some(id) && snapshot.status == SessionStatus::Running {
                snapshot.status = SessionStatus::Exited(code);
                true
            } else {
                false
            }
        });
        exit_tx.send_replace(Some(code));
    });

    (exit_rx, kill_tx)
}

async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<i32>>) -> i32 {
    match exit_rx.wait_for(Option::is_some).await {
        Ok(code) => (*code).unwrap_or(-1),
        Err(_) => -1,
    }
}

async fn read_session_output(
    demux: Demultiplexer,
    output: OutputPipe,
    mut exit_rx: watch::Receiver<Option<i32>>,
    stopping: Arc<AtomicBool>,
    console: ConsoleSender,
    done_tx: watch::Sender<bool>,
) -> DemuxStats {
    let stats = demux.run(BufReader::new(output)).await;
    if !stopping.load(Ordering::SeqCst) {
        let code = wait_for_exit(&mut exit_rx).await;
        if !stopping.load(Ordering::SeqCst) {
            let _ = console.send(ConsoleLine::Exited(code));
        }
    }
    done_tx.send_replace(true);
    stats
}
