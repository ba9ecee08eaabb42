//! Shared types for process results and session classification.
//!
//! These types carry no I/O handles and can be constructed freely in tests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Captured output of a bounded child process.
///
/// When `timed_out` is true, `exit_code` is `None` and `stdout`/`stderr` hold
/// whatever the child wrote before the deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimedResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code when the child exited on its own. `None` on timeout or when
    /// the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Bytes drained from stdout but not stored (output limit).
    pub stdout_truncated: usize,
    /// Bytes drained from stderr but not stored (output limit).
    pub stderr_truncated: usize,
}

impl TimedResult {
    /// A result for a child that exited with `code`.
    pub fn exited(code: i32, stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// A result for a child that was still running at the deadline.
    pub fn timed_out(partial_stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: partial_stdout.into(),
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Terminal verdict a rule can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
}

/// Terminal classification of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// A rule recorded success.
    Success,
    /// The session ended without a success verdict.
    Failure,
    /// No expected prompt ever appeared and the program was still attached.
    Timeout,
    /// The pseudo-terminal or the program could not be started.
    SpawnError,
}

impl SessionOutcome {
    pub fn is_success(self) -> bool {
        self == SessionOutcome::Success
    }
}

impl From<Verdict> for SessionOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Success => SessionOutcome::Success,
            Verdict::Failure => SessionOutcome::Failure,
        }
    }
}

/// Result of waiting for a single pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Matched,
    /// The step timeout elapsed before the pattern appeared.
    TimedOut,
    /// The program's output closed before the pattern appeared.
    Closed,
}

/// Hardware component class queried through `fru-util`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InventoryKind {
    Psu,
    Fan,
    Sys,
}

impl InventoryKind {
    /// Subcommand name understood by `fru-util`.
    pub fn as_arg(self) -> &'static str {
        match self {
            InventoryKind::Psu => "psu",
            InventoryKind::Fan => "fan",
            InventoryKind::Sys => "sys",
        }
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_result_has_no_exit_code() {
        let result = TimedResult::timed_out("partial");
        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.stdout_lossy(), "partial");
        assert!(!result.success());
    }

    #[test]
    fn verdict_maps_to_outcome() {
        assert_eq!(
            SessionOutcome::from(Verdict::Success),
            SessionOutcome::Success
        );
        assert_eq!(
            SessionOutcome::from(Verdict::Failure),
            SessionOutcome::Failure
        );
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&SessionOutcome::SpawnError).expect("serialize");
        assert_eq!(json, "\"spawn_error\"");
    }
}
