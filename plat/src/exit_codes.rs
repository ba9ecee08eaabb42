//! Stable exit codes for `plat` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, unreadable config, or other errors before any action ran.
pub const INVALID: i32 = 1;
/// The action ran and reported `{"result": "fail"}`.
pub const FAILED: i32 = 2;
