use std::path::Path;

use anyhow::Result;

use super::CoverageProvider;
use crate::core::types::{CoverageCounts, ExecutionContext};
use crate::io::task_log::TaskLog;

/// Backend that runs the tests without measuring anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoverage;

impl CoverageProvider for NoCoverage {
    fn name(&self) -> &str {
        "none"
    }

    fn default_filename(&self) -> &str {
        "coverage.none"
    }

    fn display_units(&self) -> &str {
        "lines"
    }

    fn extract_coverage_info(
        &self,
        log: &mut TaskLog,
        _context: &ExecutionContext,
        _coverage_filename: &Path,
        _binary: &Path,
    ) -> Result<CoverageCounts> {
        log.write_line("No coverage information is collected.");
        Ok(CoverageCounts::default())
    }
}
