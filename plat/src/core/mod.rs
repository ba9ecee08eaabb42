//! Deterministic, pure logic shared by the platform handlers.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod envelope;
pub mod gpio;
pub mod matcher;
pub mod rules;
pub mod types;
