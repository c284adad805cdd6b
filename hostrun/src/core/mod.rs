//! Deterministic, pure logic shared by the executor and the CLI.
//!
//! Core modules are free of I/O side effects. They operate on in-memory data
//! and return deterministic outputs suitable for tests.

pub mod queue;
pub mod report;
pub mod types;
