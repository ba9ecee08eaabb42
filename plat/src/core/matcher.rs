//! Incremental pattern matching over a growing output stream.
//!
//! [`ExpectBuffer`] accumulates raw bytes as they arrive from a child process.
//! [`ExpectBuffer::take_match`] consumes everything up to the end of a match;
//! unmatched output stays buffered for later patterns.

use std::fmt;

use regex::bytes::Regex;

/// Default cap on buffered, unconsumed output.
pub const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

/// Something to look for in a program's output.
#[derive(Clone)]
pub enum Pattern {
    /// Literal substring, matched byte-for-byte.
    Substring(String),
    Regex(Regex),
}

impl Pattern {
    pub fn substring(text: impl Into<String>) -> Self {
        Pattern::Substring(text.into())
    }

    pub fn regex(expr: &str) -> Result<Self, regex::Error> {
        Ok(Pattern::Regex(Regex::new(expr)?))
    }

    /// Byte offset just past the first match in `haystack`.
    pub fn match_end(&self, haystack: &[u8]) -> Option<usize> {
        match self {
            Pattern::Substring(needle) => {
                let needle = needle.as_bytes();
                if needle.is_empty() {
                    return Some(0);
                }
                haystack
                    .windows(needle.len())
                    .position(|window| window == needle)
                    .map(|start| start + needle.len())
            }
            Pattern::Regex(re) => re.find(haystack).map(|m| m.end()),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Substring(s) => write!(f, "Substring({s:?})"),
            Pattern::Regex(re) => write!(f, "Regex({:?})", re.as_str()),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Substring(s) => f.write_str(s),
            Pattern::Regex(re) => f.write_str(re.as_str()),
        }
    }
}

/// Result of [`ExpectBuffer::strip_echo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoStrip {
    Removed,
    /// Only the start of the echo has arrived so far.
    Partial,
    Absent,
}

/// Bounded buffer of output not yet consumed by a match.
#[derive(Debug, Clone)]
pub struct ExpectBuffer {
    data: Vec<u8>,
    limit: usize,
    discarded: usize,
}

impl Default for ExpectBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_BUFFER_LIMIT)
    }
}

impl ExpectBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit: limit.max(1),
            discarded: 0,
        }
    }

    /// Append newly read bytes, dropping the oldest bytes beyond the limit.
    pub fn push(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            self.discarded += excess;
        }
    }

    /// Search the unconsumed output; on a hit, consume through the match end.
    pub fn take_match(&mut self, pattern: &Pattern) -> bool {
        match pattern.match_end(&self.data) {
            Some(end) => {
                self.data.drain(..end);
                true
            }
            None => false,
        }
    }

    /// Remove the first complete copy of `echo`, the pty's echo of a line
    /// just sent.
    pub fn strip_echo(&mut self, echo: &[u8]) -> EchoStrip {
        if echo.is_empty() {
            return EchoStrip::Removed;
        }
        if let Some(start) = self.data.windows(echo.len()).position(|w| w == echo) {
            self.data.drain(start..start + echo.len());
            return EchoStrip::Removed;
        }
        let longest = (echo.len() - 1).min(self.data.len());
        if (1..=longest).any(|n| self.data.ends_with(&echo[..n])) {
            EchoStrip::Partial
        } else {
            EchoStrip::Absent
        }
    }

    /// Total bytes dropped from the front because of the limit.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}
