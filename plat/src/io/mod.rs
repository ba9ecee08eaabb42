//! I/O helpers for platform handlers.

pub mod config;
pub mod persist;
pub mod process;
pub mod session;
