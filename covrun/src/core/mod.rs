//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod benchmark;
pub mod coverage;
pub mod phase;
pub mod result_code;
pub mod types;
