//! Test-only fakes for process runners and interactive sessions.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::core::matcher::{ExpectBuffer, Pattern};
use crate::core::types::{StepResult, TimedResult};
use crate::io::process::{CommandRunner, CommandSpec, ProcessError};
use crate::io::session::{Interaction, SessionSpawner};

/// Scripted response for one command line.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(TimedResult),
    /// Behave as if the program does not exist.
    SpawnFailure,
}

/// [`CommandRunner`] keyed by the rendered command line.
///
/// Commands without a scripted reply exit 0 with no output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: HashMap<String, ScriptedReply>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, command_line: &str, reply: ScriptedReply) -> Self {
        self.replies.insert(command_line.to_string(), reply);
        self
    }

    /// Command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, _timeout: Duration) -> Result<TimedResult, ProcessError> {
        let line = spec.to_string();
        lock(&self.calls).push(line.clone());
        match self.replies.get(&line) {
            Some(ScriptedReply::Output(result)) => Ok(result.clone()),
            Some(ScriptedReply::SpawnFailure) => Err(ProcessError::Spawn {
                program: spec.program_name(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
            None => Ok(TimedResult::exited(0, Vec::new())),
        }
    }
}

/// What a scripted session saw.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub sent: Vec<String>,
    pub patterns: Vec<String>,
}

/// Session that reveals one output segment at start and one more after each
/// line sent, like a program that prints a prompt and waits for an answer.
///
/// A pattern absent from the revealed output times out immediately, or
/// reports `Closed` once every segment is out and the program `exits()`.
#[derive(Debug)]
pub struct ScriptedSession {
    pending: VecDeque<String>,
    buffer: ExpectBuffer,
    exits: bool,
    failing_writes: bool,
    log: Arc<Mutex<SessionLog>>,
}

impl ScriptedSession {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut session = Self {
            pending: segments.into_iter().map(Into::into).collect(),
            buffer: ExpectBuffer::default(),
            exits: false,
            failing_writes: false,
            log: Arc::default(),
        };
        session.reveal_next();
        session
    }

    /// A program that never prints anything.
    pub fn silent() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Close the output once every segment has been revealed.
    pub fn exits(mut self) -> Self {
        self.exits = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.log).sent.clone()
    }

    pub fn patterns_tried(&self) -> usize {
        lock(&self.log).patterns.len()
    }

    fn reveal_next(&mut self) {
        if let Some(segment) = self.pending.pop_front() {
            self.buffer.push(segment.as_bytes());
        }
    }
}

impl Interaction for ScriptedSession {
    fn expect(&mut self, pattern: &Pattern, _timeout: Duration) -> StepResult {
        lock(&self.log).patterns.push(pattern.to_string());
        if self.buffer.take_match(pattern) {
            StepResult::Matched
        } else if self.exits && self.pending.is_empty() {
            StepResult::Closed
        } else {
            StepResult::TimedOut
        }
    }

    fn send_line(&mut self, text: &str) -> io::Result<()> {
        if self.failing_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        lock(&self.log).sent.push(text.to_string());
        self.reveal_next();
        Ok(())
    }
}

/// [`SessionSpawner`] handing out [`ScriptedSession`]s with a shared log.
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    segments: Vec<String>,
    fail: bool,
    spawned: Mutex<Vec<String>>,
    log: Arc<Mutex<SessionLog>>,
}

impl ScriptedSpawner {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Every spawn fails as if the pty could not be opened.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spawned(&self) -> Vec<String> {
        lock(&self.spawned).clone()
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.log).sent.clone()
    }
}

impl SessionSpawner for ScriptedSpawner {
    type Session = ScriptedSession;

    fn spawn(&self, spec: &CommandSpec) -> Result<ScriptedSession, ProcessError> {
        if self.fail {
            return Err(ProcessError::Pty {
                program: spec.program_name(),
                reason: "scripted failure".to_string(),
            });
        }
        lock(&self.spawned).push(spec.to_string());
        let mut session = ScriptedSession::new(self.segments.clone());
        session.log = Arc::clone(&self.log);
        Ok(session)
    }
}

/// Temporary directory of executable shell scripts standing in for board
/// utilities.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `body` as an executable `/bin/sh` script named `name`.
    pub fn script(&self, name: &str, body: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }
}

/// Poll `/proc` until `pid` is gone or only a zombie, for at most `limit`.
pub fn process_exits_within(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        let alive = match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| !rest.starts_with(['Z', 'X'])),
            Err(_) => false,
        };
        if !alive {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
