//! Interactive sessions driven by expect/send rules over a pseudo-terminal.
//!
//! [`drive`] spawns a program on a pty and walks an ordered rule script: each
//! rule waits at most `step_timeout` for its pattern, then either answers the
//! prompt or records a verdict. A pattern that never shows up only skips its
//! own rule. The [`Interaction`] and [`SessionSpawner`] traits keep the rule
//! walk independent of the pty backend so tests can use scripted sessions.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{
    Child, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize, native_pty_system,
};
use tracing::{debug, error, info, instrument, warn};

use crate::core::matcher::{DEFAULT_BUFFER_LIMIT, EchoStrip, ExpectBuffer, Pattern};
use crate::core::rules::{ExpectAction, ExpectRule};
use crate::core::types::{SessionOutcome, StepResult};
use crate::io::process::{CommandSpec, ProcessError, kill_process_group};

/// Two-way conversation with a running program.
pub trait Interaction {
    /// Wait up to `timeout` for `pattern`, consuming output through the match.
    fn expect(&mut self, pattern: &Pattern, timeout: Duration) -> StepResult;

    /// Write `text` followed by a newline.
    fn send_line(&mut self, text: &str) -> io::Result<()>;
}

/// Starts sessions for a command.
pub trait SessionSpawner {
    type Session: Interaction;

    fn spawn(&self, spec: &CommandSpec) -> Result<Self::Session, ProcessError>;
}

/// Spawns programs attached to a native pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    pub rows: u16,
    pub cols: u16,
    /// Cap on buffered, unmatched output per session.
    pub buffer_limit: usize,
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }
}

impl SessionSpawner for PtySpawner {
    type Session = PtySession;

    #[instrument(skip_all, fields(program = %spec.program_name()))]
    fn spawn(&self, spec: &CommandSpec) -> Result<PtySession, ProcessError> {
        let program = spec.program_name();
        let pty_err = |reason: String| ProcessError::Pty {
            program: program.clone(),
            reason,
        };

        let PtyPair { master, slave } = native_pty_system()
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| pty_err(e.to_string()))?;

        let mut builder = CommandBuilder::new(spec.program());
        builder.args(spec.get_args());
        if let Some(dir) = spec.get_cwd() {
            builder.cwd(dir);
        }
        for (key, value) in spec.get_env() {
            builder.env(key, value);
        }

        let child = slave.spawn_command(builder).map_err(|e| {
            error!(err = %e, "failed to spawn command on pty");
            ProcessError::Spawn {
                program: program.clone(),
                source: io::Error::other(e.to_string()),
            }
        })?;
        // Only the child may hold the slave side, otherwise reads never see EOF.
        drop(slave);

        let reader = master
            .try_clone_reader()
            .map_err(|e| pty_err(format!("clone reader: {e}")))?;
        let writer = master
            .take_writer()
            .map_err(|e| pty_err(format!("take writer: {e}")))?;

        debug!(pid = ?child.process_id(), command = %spec, "spawned pty session");
        Ok(PtySession {
            program,
            child,
            writer,
            output: spawn_reader(reader),
            buffer: ExpectBuffer::with_limit(self.buffer_limit),
            pending_echo: None,
            closed: false,
            _master: master,
        })
    }
}

/// Forward pty output to a channel until EOF or a read error.
fn spawn_reader(mut reader: Box<dyn Read + Send>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // EIO once the child side closes.
                Err(e) => {
                    debug!(err = %e, "pty read ended");
                    break;
                }
            }
        }
    });
    rx
}

/// A program running on a pty. The child and anything it started are killed
/// when the session drops.
pub struct PtySession {
    program: String,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: Receiver<Vec<u8>>,
    buffer: ExpectBuffer,
    /// Last line sent, until the terminal's echo of it has been dropped.
    pending_echo: Option<Vec<u8>>,
    closed: bool,
    _master: Box<dyn MasterPty + Send>,
}

impl PtySession {
    /// Drop the echo of the last sent line so it cannot satisfy a pattern.
    /// Returns false while only part of the echo has arrived.
    fn strip_pending_echo(&mut self) -> bool {
        let Some(echo) = &self.pending_echo else {
            return true;
        };
        match self.buffer.strip_echo(echo) {
            EchoStrip::Removed => {
                self.pending_echo = None;
                true
            }
            EchoStrip::Absent => true,
            EchoStrip::Partial => false,
        }
    }

    fn terminate(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        // The pty child leads its own session, so its pid is also its group.
        let group_killed = self.child.process_id().is_some_and(kill_process_group);
        if !group_killed && let Err(e) = self.child.kill() {
            debug!(program = %self.program, err = %e, "kill pty child");
        }
        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) | Err(_) => return,
                Ok(None) => thread::sleep(Duration::from_millis(10)),
            }
        }
        warn!(program = %self.program, "pty child did not exit after kill");
    }
}

impl Interaction for PtySession {
    fn expect(&mut self, pattern: &Pattern, timeout: Duration) -> StepResult {
        let deadline = Instant::now() + timeout;
        loop {
            let echo_settled = self.strip_pending_echo();
            if (echo_settled || self.closed) && self.buffer.take_match(pattern) {
                return StepResult::Matched;
            }
            if self.closed {
                return StepResult::Closed;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return StepResult::TimedOut;
            }
            match self.output.recv_timeout(remaining) {
                Ok(chunk) => self.buffer.push(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }
    }

    fn send_line(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.pending_echo = (!text.is_empty()).then(|| text.as_bytes().to_vec());
        Ok(())
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.buffer.discarded() > 0 {
            debug!(
                program = %self.program,
                discarded = self.buffer.discarded(),
                "session output exceeded buffer limit"
            );
        }
        self.terminate();
    }
}

/// Walk `rules` in declaration order against an already running session.
///
/// Each rule is tried once. The first recorded verdict ends the walk. Without
/// a verdict the outcome is `Failure`, or `Timeout` when no rule matched and
/// the last step ran out of time with the program still attached.
pub fn drive_session<I: Interaction>(
    session: &mut I,
    rules: &[ExpectRule],
    step_timeout: Duration,
) -> SessionOutcome {
    let mut any_matched = false;
    let mut last_step = None;

    for (index, rule) in rules.iter().enumerate() {
        let step = session.expect(&rule.pattern, step_timeout);
        debug!(index, pattern = %rule.pattern, ?step, "expect step");
        last_step = Some(step);
        if step != StepResult::Matched {
            continue;
        }
        any_matched = true;

        match &rule.action {
            ExpectAction::Send(text) => {
                if let Err(e) = session.send_line(text) {
                    warn!(index, err = %e, "failed to answer prompt");
                    return SessionOutcome::Failure;
                }
            }
            ExpectAction::Record(verdict) => {
                info!(index, ?verdict, "session verdict recorded");
                return (*verdict).into();
            }
        }
    }

    if !any_matched && last_step == Some(StepResult::TimedOut) {
        warn!("no expected output before step timeouts");
        SessionOutcome::Timeout
    } else {
        SessionOutcome::Failure
    }
}

/// Spawn `spec` with `spawner` and drive it through `rules`.
#[instrument(
    skip_all,
    fields(
        program = %spec.program_name(),
        rules = rules.len(),
        step_timeout_ms = step_timeout.as_millis() as u64,
    )
)]
pub fn drive_with<S: SessionSpawner>(
    spawner: &S,
    spec: &CommandSpec,
    rules: &[ExpectRule],
    step_timeout: Duration,
) -> SessionOutcome {
    let mut session = match spawner.spawn(spec) {
        Ok(session) => session,
        Err(e) => {
            error!(err = %e, "could not start interactive session");
            return SessionOutcome::SpawnError;
        }
    };
    drive_session(&mut session, rules, step_timeout)
}

/// Spawn `spec` on a pseudo-terminal and drive it through `rules`.
pub fn drive(spec: &CommandSpec, rules: &[ExpectRule], step_timeout: Duration) -> SessionOutcome {
    drive_with(&PtySpawner::default(), spec, rules, step_timeout)
}
