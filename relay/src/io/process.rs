//! Child process supervision.
//!
//! [`Supervisor`] owns one streaming assistant process for the duration of a
//! turn and turns its output into a single ordered channel of
//! [`SupervisorEvent`]s. [`run_command_with_timeout`] is the bounded one-shot
//! variant used for short probes such as `--version`.

use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::framer::LineFramer;
use crate::error::SpawnError;

const READ_CHUNK: usize = 8192;

/// Everything needed to start the streaming process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    /// Variables set on top of the inherited environment.
    pub env: Vec<(String, OsString)>,
    pub timeout: Duration,
}

/// One event from a supervised process, in arrival order.
///
/// Exactly one terminal event (`Closed`, `TimedOut` or `Aborted`) is
/// delivered by [`Supervisor::next_event`]; nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// One complete stdout line, without its terminator.
    Line(String),
    /// Advisory stderr output. Never parsed.
    Stderr(String),
    Closed { code: Option<i32> },
    TimedOut,
    Aborted,
}

impl SupervisorEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorEvent::Closed { .. } | SupervisorEvent::TimedOut | SupervisorEvent::Aborted
        )
    }
}

/// Cloneable handle that cancels a supervised turn from any thread.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    pid: Option<u32>,
    aborted: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    wake: Sender<SupervisorEvent>,
}

impl AbortHandle {
    fn new(pid: Option<u32>, exited: Arc<AtomicBool>, wake: Sender<SupervisorEvent>) -> Self {
        Self {
            pid,
            aborted: Arc::new(AtomicBool::new(false)),
            exited,
            wake,
        }
    }

    /// Send a graceful termination signal and end the turn.
    ///
    /// Returns `false` if the turn was already aborted.
    pub fn abort(&self) -> bool {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(pid = ?self.pid, "aborting assistant process");
        self.terminate();
        // Wakes a reader blocked on an idle process.
        let _ = self.wake.send(SupervisorEvent::Aborted);
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn terminate(&self) {
        if let Some(pid) = self.pid
            && !self.exited.load(Ordering::SeqCst)
        {
            send_sigterm(pid);
        }
    }
}

/// Owner of one streaming child process.
#[derive(Debug)]
pub struct Supervisor {
    events: Receiver<SupervisorEvent>,
    abort: AbortHandle,
    timeout: Duration,
    /// `None` when the timeout is too large to represent as an instant.
    deadline: Option<Instant>,
    finished: bool,
}

impl Supervisor {
    /// Spawn the process with stdin closed and both output pipes wired up.
    #[instrument(skip_all, fields(program = %spec.program.display(), args = spec.args.len(), timeout_secs = spec.timeout.as_secs()))]
    pub fn start(spec: &LaunchSpec) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        debug!(workdir = ?spec.workdir, "spawning assistant process");
        let spawn_error = |source| SpawnError {
            program: spec.program.clone(),
            source,
        };
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(err = %err, "failed to spawn assistant process");
                return Err(spawn_error(err));
            }
        };

        let pipes = child.stdout.take().zip(child.stderr.take());
        let Some((stdout, stderr)) = pipes else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_error(std::io::Error::other("output was not piped")));
        };

        let pid = child.id();
        let (tx, rx) = mpsc::channel();
        let exited = Arc::new(AtomicBool::new(false));

        let stderr_tx = tx.clone();
        let stderr_pump = thread::spawn(move || pump_stderr(stderr, stderr_tx));
        let stdout_tx = tx.clone();
        let stdout_exited = exited.clone();
        thread::spawn(move || pump_stdout(child, stdout, stderr_pump, stdout_tx, stdout_exited));

        info!(pid, "assistant process started");
        Ok(Self::with_handle(
            rx,
            AbortHandle::new(Some(pid), exited, tx),
            spec.timeout,
        ))
    }

    /// Build a supervisor over an existing event channel with no process behind it.
    ///
    /// `wake` must feed `events`; it is what [`AbortHandle::abort`] signals.
    pub fn from_channel(
        events: Receiver<SupervisorEvent>,
        wake: Sender<SupervisorEvent>,
        timeout: Duration,
    ) -> Self {
        let exited = Arc::new(AtomicBool::new(false));
        Self::with_handle(events, AbortHandle::new(None, exited, wake), timeout)
    }

    fn with_handle(events: Receiver<SupervisorEvent>, abort: AbortHandle, timeout: Duration) -> Self {
        Self {
            events,
            abort,
            timeout,
            deadline: Instant::now().checked_add(timeout),
            finished: false,
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.abort.pid
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block for the next event. Returns `None` once a terminal event was delivered.
    pub fn next_event(&mut self) -> Option<SupervisorEvent> {
        if self.finished {
            return None;
        }
        loop {
            if self.abort.is_aborted() {
                self.finished = true;
                return Some(SupervisorEvent::Aborted);
            }
            let received = match self.deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        warn!(
                            timeout_secs = self.timeout.as_secs(),
                            "assistant process timed out, terminating"
                        );
                        self.abort.terminate();
                        self.finished = true;
                        return Some(SupervisorEvent::TimedOut);
                    }
                    self.events.recv_timeout(remaining)
                }
                None => self
                    .events
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                // Handled by the flag check above.
                Ok(SupervisorEvent::Aborted) | Err(RecvTimeoutError::Timeout) => continue,
                Ok(event) => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("supervisor event channel disconnected");
                    self.finished = true;
                    return Some(SupervisorEvent::Closed { code: None });
                }
            }
        }
    }
}

/// Frame stdout into lines, then reap the child and report its exit code.
///
/// Reading continues after the receiver is gone so the child never blocks on
/// a full pipe while it shuts down. `Closed` is sent only after the stderr
/// pump has finished, so every stderr chunk precedes it.
fn pump_stdout(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr_pump: thread::JoinHandle<()>,
    tx: Sender<SupervisorEvent>,
    exited: Arc<AtomicBool>,
) {
    let mut framer = LineFramer::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                for line in framer.feed(&chunk[..n]) {
                    let _ = tx.send(SupervisorEvent::Line(line));
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(err = %err, "failed to read assistant stdout");
                break;
            }
        }
    }
    let discarded = framer.finish();
    if discarded > 0 {
        debug!(discarded, "discarding unterminated trailing output");
    }

    let code = match child.wait() {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(err = %err, "failed to wait for assistant process");
            None
        }
    };
    exited.store(true, Ordering::SeqCst);
    if stderr_pump.join().is_err() {
        warn!("stderr reader thread panicked");
    }
    debug!(exit_code = ?code, "assistant process exited");
    let _ = tx.send(SupervisorEvent::Closed { code });
}

fn pump_stderr<R: Read>(mut stderr: R, tx: Sender<SupervisorEvent>) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match stderr.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                debug!(stderr = %text.trim_end(), "assistant stderr");
                let _ = tx.send(SupervisorEvent::Stderr(text));
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(err = %err, "failed to read assistant stderr");
                break;
            }
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn send_sigterm(pid: u32) {
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, err = %std::io::Error::last_os_error(), "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) {
    warn!(pid, "graceful termination is not supported on this platform");
}

/// Captured output of a bounded one-shot command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr kept in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = join_output(stdout_handle).context("join stdout")?;
    let stderr = join_output(stderr_handle).context("join stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    if truncated > 0 {
        warn!(truncated, "command output truncated");
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(events: Vec<SupervisorEvent>, timeout: Duration) -> Supervisor {
        let (tx, rx) = mpsc::channel();
        for event in events {
            tx.send(event).expect("send");
        }
        Supervisor::from_channel(rx, tx, timeout)
    }

    #[test]
    fn delivers_events_then_stops_after_terminal() {
        let mut sup = scripted(
            vec![
                SupervisorEvent::Line("a".to_string()),
                SupervisorEvent::Closed { code: Some(0) },
                SupervisorEvent::Line("late".to_string()),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(sup.next_event(), Some(SupervisorEvent::Line("a".to_string())));
        assert_eq!(sup.next_event(), Some(SupervisorEvent::Closed { code: Some(0) }));
        assert_eq!(sup.next_event(), None);
    }

    /// Abort takes priority over lines that are already queued.
    #[test]
    fn abort_preempts_queued_lines() {
        let mut sup = scripted(
            vec![
                SupervisorEvent::Line("a".to_string()),
                SupervisorEvent::Line("b".to_string()),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(sup.next_event(), Some(SupervisorEvent::Line("a".to_string())));
        let handle = sup.abort_handle();
        assert!(handle.abort());
        assert!(!handle.abort(), "second abort is a no-op");
        assert_eq!(sup.next_event(), Some(SupervisorEvent::Aborted));
        assert_eq!(sup.next_event(), None);
    }

    #[test]
    fn idle_channel_times_out() {
        let mut sup = scripted(Vec::new(), Duration::from_millis(30));
        assert_eq!(sup.next_event(), Some(SupervisorEvent::TimedOut));
        assert_eq!(sup.next_event(), None);
    }

    /// A timeout too large for `Instant` means no deadline rather than a panic.
    #[test]
    fn unrepresentable_timeout_has_no_deadline() {
        let mut sup = scripted(
            vec![
                SupervisorEvent::Line("a".to_string()),
                SupervisorEvent::Closed { code: Some(0) },
            ],
            Duration::MAX,
        );
        assert_eq!(sup.timeout(), Duration::MAX);
        assert_eq!(sup.next_event(), Some(SupervisorEvent::Line("a".to_string())));
        assert_eq!(sup.next_event(), Some(SupervisorEvent::Closed { code: Some(0) }));
    }

    #[test]
    fn terminal_classification() {
        assert!(SupervisorEvent::TimedOut.is_terminal());
        assert!(SupervisorEvent::Closed { code: None }.is_terminal());
        assert!(!SupervisorEvent::Stderr("x".to_string()).is_terminal());
    }

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_kills_slow_command() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let output =
            run_command_with_timeout(cmd, Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_bounds_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'abcdefgh'");
        let output = run_command_with_timeout(cmd, Duration::from_secs(5), 4).expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"abcd");
    }
}
