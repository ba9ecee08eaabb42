//! Helpers for running child processes with timeouts and bounded output.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::TimedResult;

/// How long reader threads may keep draining after the child is gone.
pub const DRAIN_GRACE: Duration = Duration::from_millis(200);

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Failure to start or supervise an external program.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be launched (not found, permission denied).
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("open pseudo-terminal for {program}: {reason}")]
    Pty { program: String, reason: String },
    #[error("{op} {program}: {source}")]
    Io {
        op: &'static str,
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    pub fn is_spawn(&self) -> bool {
        matches!(self, ProcessError::Spawn { .. } | ProcessError::Pty { .. })
    }
}

/// Program and argument vector to execute, never interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }

    pub fn get_env(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Build a `std::process::Command` with args, cwd and env applied.
    ///
    /// The child leads a new process group so a timeout can kill everything
    /// it started.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.process_group(0);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs a command to completion or deadline.
///
/// Callers depend on this instead of spawning directly so tests can script
/// slow or missing utilities.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<TimedResult, ProcessError>;
}

/// Runner backed by real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    pub output_limit_bytes: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<TimedResult, ProcessError> {
        run_command_with_timeout(spec, None, timeout, self.output_limit_bytes)
    }
}

/// Output collected by a reader thread, shared so the caller can snapshot it
/// even when the pipe never reaches EOF.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

struct StreamCapture {
    shared: Arc<Mutex<Captured>>,
    done: Receiver<()>,
}

impl StreamCapture {
    fn start<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let shared = Arc::new(Mutex::new(Captured::default()));
        let (done_tx, done) = mpsc::channel();
        let sink = Arc::clone(&shared);
        thread::spawn(move || {
            if let Err(e) = read_stream_limited(reader, limit, &sink) {
                debug!(err = %e, "output reader stopped");
            }
            let _ = done_tx.send(());
        });
        Self { shared, done }
    }

    /// Wait for the reader to hit EOF until `deadline`, then take what it has.
    fn finish(self, deadline: Instant) -> (Vec<u8>, usize, bool) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let drained = match self.done.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        let mut captured = lock(&self.shared);
        (
            std::mem::take(&mut captured.bytes),
            captured.truncated,
            drained,
        )
    }
}

fn lock(shared: &Mutex<Captured>) -> MutexGuard<'_, Captured> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// SIGKILL every process in the group led by `pid`.
///
/// Returns true when the group is gone, including when it had already exited.
pub fn kill_process_group(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => true,
        Err(e) => {
            debug!(pid, err = %e, "killpg failed");
            false
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. On timeout the child is
/// killed along with its process group and reaped, and the output produced
/// so far is returned with `timed_out = true`. `output_limit_bytes` bounds the
/// amount of stdout/stderr stored in memory (bytes beyond this are discarded while still draining the
/// pipe). The call returns within `timeout` plus [`DRAIN_GRACE`] even if a
/// grandchild keeps the pipes open.
#[instrument(
    skip_all,
    fields(
        program = %spec.program_name(),
        timeout_ms = timeout.as_millis() as u64,
        output_limit_bytes = output_limit_bytes,
    )
)]
pub fn run_command_with_timeout(
    spec: &CommandSpec,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<TimedResult, ProcessError> {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut cmd = spec.to_command();
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(command = %spec, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(ProcessError::Spawn {
                program: spec.program_name(),
                source: e,
            });
        }
    };

    let stdout = child.stdout.take().map(|s| StreamCapture::start(s, output_limit_bytes));
    let stderr = child.stderr.take().map(|s| StreamCapture::start(s, output_limit_bytes));

    if let Some(input) = stdin
        && let Some(mut child_stdin) = child.stdin.take()
    {
        let input = input.to_vec();
        thread::spawn(move || {
            // A child that exits without reading its input is not an error.
            if let Err(e) = child_stdin.write_all(&input) {
                debug!(err = %e, "stdin writer stopped");
            }
        });
    }

    let io_err = |op: &'static str, source: io::Error| ProcessError::Io {
        op,
        program: spec.program_name(),
        source,
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    let mut timed_out = false;
    let status = match child
        .wait_timeout(remaining)
        .map_err(|e| io_err("wait for", e))?
    {
        Some(status) => Some(status),
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            if !kill_process_group(child.id())
                && let Err(e) = child.kill()
            {
                warn!(err = %e, "failed to kill timed out command");
            }
            child.wait().map_err(|e| io_err("reap", e))?;
            None
        }
    };

    let drain_deadline = deadline.max(Instant::now()) + DRAIN_GRACE;
    let (stdout, stdout_truncated, stdout_drained) =
        finish_capture(stdout, drain_deadline, "stdout");
    let (stderr, stderr_truncated, stderr_drained) =
        finish_capture(stderr, drain_deadline, "stderr");
    if !(stdout_drained && stderr_drained) {
        // Leftover group members still hold the pipes.
        kill_process_group(child.id());
    }

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let exit_code = status.and_then(|s| s.code());
    debug!(
        exit_code = ?exit_code,
        timed_out,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "command finished"
    );
    Ok(TimedResult {
        stdout,
        stderr,
        exit_code,
        timed_out,
        stdout_truncated,
        stderr_truncated,
    })
}

fn finish_capture(
    capture: Option<StreamCapture>,
    deadline: Instant,
    label: &'static str,
) -> (Vec<u8>, usize, bool) {
    let Some(capture) = capture else {
        return (Vec::new(), 0, true);
    };
    let (bytes, truncated, drained) = capture.finish(deadline);
    if !drained {
        warn!(stream = label, "pipe still open after child exit, returning partial output");
    }
    (bytes, truncated, drained)
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Captured>,
) -> io::Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let mut captured = lock(sink);
        let remaining = limit.saturating_sub(captured.bytes.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.truncated += n.saturating_sub(keep);
        } else {
            captured.truncated += n;
        }
    }

    Ok(())
}
