//! One spawned backend child and the tasks that own its stdio.
//!
//! # Tasks per child
//! - writer: sole owner of stdin, drains a bounded message queue
//! - reader: sole owner of stdout, decodes frames into [`BackendEvent`]s
//! - stderr: forwards diagnostic lines into the log
//! - monitor: owns the `Child`, reports exit, performs termination
//!
//! Dropping the writer queue's sender closes stdin, which most stdio
//! servers treat as a request to exit.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::backend::CommandSpec;
use crate::config::BackendConfig;
use crate::error::{BridgeError, Result};
use crate::jsonrpc::{Frame, JsonLineCodec, Message};
use crate::observability::metrics;

/// How long the monitor waits for stdout to drain after the child exits.
const READER_DRAIN: Duration = Duration::from_secs(2);

/// Events flowing from a child's tasks to the supervisor loop.
#[derive(Debug)]
pub enum BackendEvent {
    /// A decoded message from stdout.
    Message { generation: u64, message: Message },
    /// Too many malformed lines in a row.
    FramingFailure { generation: u64, consecutive: u32 },
    /// The child exited (for any reason).
    Exited { generation: u64, status: String },
}

/// Handle to a live child.
#[derive(Debug)]
pub struct ProcessHandle {
    generation: u64,
    pid: Option<u32>,
    started_at: Instant,
    writer: mpsc::Sender<Message>,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<()>,
}

impl ProcessHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn writer(&self) -> &mpsc::Sender<Message> {
        &self.writer
    }

    /// Close stdin, then escalate until the child is gone.
    pub async fn terminate(mut self) {
        drop(self.writer);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = self.monitor.await {
            tracing::error!(generation = self.generation, error = %e, "Backend monitor task failed");
        }
    }
}

/// Spawn the child and wait until it is confirmed alive.
///
/// The child counts as alive once it survives `ready_delay`; an earlier exit
/// is reported as [`BridgeError::StartupExit`].
pub async fn spawn(
    generation: u64,
    spec: &CommandSpec,
    config: &BackendConfig,
    tmpdir: Option<&Path>,
    events: mpsc::Sender<BackendEvent>,
) -> Result<ProcessHandle> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }
    if let Some(tmp) = tmpdir {
        command.env("TMPDIR", tmp);
    }

    let mut child = command.spawn().map_err(BridgeError::Spawn)?;
    let pid = child.id();

    let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    tracing::info!(generation, pid = ?pid, command = %spec, "Backend spawned");

    let (writer, writer_rx) = mpsc::channel(config.writer_queue);
    tokio::spawn(write_loop(generation, stdin, writer_rx));
    tokio::spawn(stderr_loop(generation, stderr));
    let reader = tokio::spawn(read_loop(
        generation,
        stdout,
        events.clone(),
        config.max_line_bytes,
        config.max_consecutive_parse_errors,
    ));

    tokio::select! {
        status = child.wait() => {
            let status = describe(status);
            tracing::warn!(generation, status = %status, "Backend exited during startup");
            return Err(BridgeError::StartupExit(status));
        }
        _ = tokio::time::sleep(config.ready_delay()) => {}
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let monitor = tokio::spawn(monitor(
        generation,
        child,
        reader,
        stop_rx,
        config.stop_grace(),
        events,
    ));

    Ok(ProcessHandle {
        generation,
        pid,
        started_at: Instant::now(),
        writer,
        stop_tx: Some(stop_tx),
        monitor,
    })
}

fn missing_pipe(name: &str) -> BridgeError {
    BridgeError::Spawn(std::io::Error::other(format!("child {} was not captured", name)))
}

fn describe(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}

async fn write_loop(generation: u64, stdin: ChildStdin, mut rx: mpsc::Receiver<Message>) {
    let mut sink = FramedWrite::new(stdin, JsonLineCodec::new(usize::MAX));
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            tracing::warn!(generation, error = %e, "Backend stdin write failed");
            break;
        }
    }
    tracing::debug!(generation, "Backend stdin closed");
}

async fn read_loop(
    generation: u64,
    stdout: ChildStdout,
    events: mpsc::Sender<BackendEvent>,
    max_line_bytes: usize,
    max_consecutive_errors: u32,
) {
    let mut frames = FramedRead::new(stdout, JsonLineCodec::new(max_line_bytes));
    let mut consecutive = 0u32;

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Message(message)) => {
                consecutive = 0;
                if events
                    .send(BackendEvent::Message { generation, message })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Frame::Malformed(error)) => {
                consecutive += 1;
                metrics::record_framing_error();
                tracing::warn!(generation, consecutive, error = %error, "Discarding malformed backend output");
                if consecutive == max_consecutive_errors {
                    let _ = events
                        .send(BackendEvent::FramingFailure { generation, consecutive })
                        .await;
                }
            }
            Err(e) => {
                tracing::error!(generation, error = %e, "Backend stdout read failed");
                break;
            }
        }
    }
    tracing::debug!(generation, "Backend stdout closed");
}

async fn stderr_loop(generation: u64, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "backend", generation, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(generation, error = %e, "Backend stderr read failed");
                break;
            }
        }
    }
}

async fn monitor(
    generation: u64,
    mut child: Child,
    reader: JoinHandle<()>,
    stop_rx: oneshot::Receiver<()>,
    grace: Duration,
    events: mpsc::Sender<BackendEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => describe(status),
        _ = stop_rx => terminate(generation, &mut child, grace).await,
    };

    // Forward whatever the child wrote before exiting ahead of the exit event.
    if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
        tracing::warn!(generation, "Backend stdout still open after exit");
    }

    tracing::info!(generation, status = %status, "Backend exited");
    let _ = events.send(BackendEvent::Exited { generation, status }).await;
}

/// stdin is already closed; wait, SIGTERM, wait, SIGKILL.
async fn terminate(generation: u64, child: &mut Child, grace: Duration) -> String {
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return describe(status);
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        tracing::info!(generation, pid, "Sending SIGTERM to backend");
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!(generation, pid, error = %e, "SIGTERM failed");
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return describe(status);
        }
    }

    tracing::warn!(generation, "Backend ignored termination, killing");
    if let Err(e) = child.kill().await {
        tracing::error!(generation, error = %e, "Failed to kill backend");
    }
    describe(child.wait().await)
}
