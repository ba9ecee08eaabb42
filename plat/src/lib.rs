//! Board-support glue for the BMC platform.
//!
//! The crate keeps the same split as the rest of the platform tooling:
//!
//! - **[`core`]**: Pure logic and data (pattern matching, rule scripts, JSON
//!   envelopes, GPIO tables). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (bounded child processes,
//!   pseudo-terminal sessions, credential persistence, configuration).
//!
//! Handler modules ([`fruid`], [`password`]) combine the two and return the
//! JSON bodies served by the platform REST API and printed by the `plat` CLI.

pub mod core;
pub mod exit_codes;
pub mod fruid;
pub mod io;
pub mod logging;
pub mod password;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
