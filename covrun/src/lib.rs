//! Coverage-aware test execution.
//!
//! Given the binaries a build produced and the command line that runs their
//! tests, the crate instruments the binaries, wraps the run in a coverage
//! session, and reduces the collected data to per-binary and aggregate ratios.
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (result codes, phases, coverage
//!   arithmetic, benchmark units). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (processes, task fan-out, coverage
//!   backends, config and report files). Isolated behind the
//!   [`io::provider::CoverageProvider`] seam so tests never spawn tools.
//!
//! [`orchestrate`] sequences the phases; [`report`] renders the outcome for the
//! CLI.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
