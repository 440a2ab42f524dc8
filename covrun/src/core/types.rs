//! Result and context types shared by the orchestrator and its callers.
//!
//! These are plain data: they carry no behaviour beyond construction helpers
//! and are serialized as-is by the CLI.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::core::result_code;

/// Inputs describing one build's outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Root of the sources the binaries were built from.
    pub input: PathBuf,
    /// Directory receiving the coverage artifact and run log.
    pub output_dir: PathBuf,
    /// Test binaries produced by the build step.
    pub output_filenames: Vec<PathBuf>,
}

impl ExecutionContext {
    pub fn new(input: PathBuf, output_dir: PathBuf, output_filenames: Vec<PathBuf>) -> Self {
        Self {
            input,
            output_dir,
            output_filenames,
        }
    }
}

/// Covered / not-covered unit counts for one binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CoverageCounts {
    pub covered: u64,
    pub not_covered: u64,
}

impl CoverageCounts {
    pub fn new(covered: u64, not_covered: u64) -> Self {
        Self {
            covered,
            not_covered,
        }
    }

    pub fn total(&self) -> u64 {
        self.covered + self.not_covered
    }
}

/// Coverage for a single binary, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryCoverage {
    /// Covered fraction in `[0, 1]`.
    pub ratio: f64,
    /// e.g. "8 of 10 lines covered".
    pub description: String,
}

/// Outcome of the coverage pipeline.
///
/// When coverage was not collected the object is still present, with
/// `coverage_filename`, `coverage_ratio` and `per_binary` all `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageResult {
    pub result_code: i32,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub short_desc: Option<String>,
    pub coverage_filename: Option<PathBuf>,
    pub coverage_ratio: Option<f64>,
    pub per_binary: Option<BTreeMap<String, BinaryCoverage>>,
}

impl CoverageResult {
    /// A result whose numerics are all absent.
    pub fn not_collected(result_code: i32, duration: Duration, short_desc: Option<String>) -> Self {
        Self {
            result_code,
            duration,
            short_desc,
            coverage_filename: None,
            coverage_ratio: None,
            per_binary: None,
        }
    }

    /// A result produced by a completed extraction.
    pub fn collected(
        duration: Duration,
        coverage_filename: PathBuf,
        coverage_ratio: f64,
        per_binary: BTreeMap<String, BinaryCoverage>,
    ) -> Self {
        Self {
            result_code: result_code::SUCCESS,
            duration,
            short_desc: None,
            coverage_filename: Some(coverage_filename),
            coverage_ratio: Some(coverage_ratio),
            per_binary: Some(per_binary),
        }
    }

    pub fn is_collected(&self) -> bool {
        self.coverage_ratio.is_some()
    }
}

/// Outcome of a test execution, including any coverage information.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteResult {
    pub result_code: i32,
    #[serde(serialize_with = "serialize_secs")]
    pub execution_duration: Duration,
    pub short_desc: Option<String>,
    pub coverage: Option<CoverageResult>,
}

impl ExecuteResult {
    pub fn new(result_code: i32, execution_duration: Duration, short_desc: Option<String>) -> Self {
        Self {
            result_code,
            execution_duration,
            short_desc,
            coverage: None,
        }
    }

    /// Attach the coverage pipeline's outcome.
    pub fn with_coverage(self, coverage: CoverageResult) -> Self {
        Self {
            coverage: Some(coverage),
            ..self
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result_code == result_code::SUCCESS
            && self
                .coverage
                .as_ref()
                .is_none_or(|coverage| coverage.result_code == result_code::SUCCESS)
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
