//! Expect/send rule scripts for interactive sessions.

use std::fmt;

use crate::core::matcher::Pattern;
use crate::core::types::Verdict;

/// What to do when a rule's pattern appears.
#[derive(Clone)]
pub enum ExpectAction {
    /// Write the text followed by a newline to the program.
    Send(String),
    /// End the session with this verdict.
    Record(Verdict),
}

// Sent text is usually a secret; keep it out of logs.
impl fmt::Debug for ExpectAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectAction::Send(text) => write!(f, "Send(<{} bytes>)", text.len()),
            ExpectAction::Record(verdict) => write!(f, "Record({verdict:?})"),
        }
    }
}

/// One step of an interactive script.
#[derive(Debug, Clone)]
pub struct ExpectRule {
    pub pattern: Pattern,
    pub action: ExpectAction,
}

impl ExpectRule {
    pub fn send(pattern: Pattern, text: impl Into<String>) -> Self {
        Self {
            pattern,
            action: ExpectAction::Send(text.into()),
        }
    }

    pub fn record(pattern: Pattern, verdict: Verdict) -> Self {
        Self {
            pattern,
            action: ExpectAction::Record(verdict),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.action, ExpectAction::Record(_))
    }
}

pub const NEW_PASSWORD_PROMPT: &str = "New password";
pub const REENTER_PASSWORD_PROMPT: &str = "Re-enter new password";
pub const PASSWORD_CHANGED: &str = "password changed";
pub const PASSWORD_UNCHANGED: &str = "unchanged";

/// Script answering the `passwd` prompts with `new_password`.
///
/// Order matters: the success marker is declared before the failure marker,
/// and the first terminal match ends the session.
pub fn passwd_rules(new_password: &str) -> Vec<ExpectRule> {
    vec![
        ExpectRule::send(Pattern::substring(NEW_PASSWORD_PROMPT), new_password),
        ExpectRule::send(Pattern::substring(REENTER_PASSWORD_PROMPT), new_password),
        ExpectRule::record(Pattern::substring(PASSWORD_CHANGED), Verdict::Success),
        ExpectRule::record(Pattern::substring(PASSWORD_UNCHANGED), Verdict::Failure),
    ]
}
