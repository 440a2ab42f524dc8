//! Coverage backends.
//!
//! The [`CoverageProvider`] trait is the seam between orchestration and a
//! concrete coverage tool. Every hook except extraction has a default, so a
//! backend overrides only what it needs. Tests use scripted providers that
//! never spawn processes.

mod command;
mod llvm_cov;
mod none;

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use anyhow::Result;
use tracing::debug;

use crate::core::types::{CoverageCounts, ExecuteResult, ExecutionContext};
use crate::io::config::{CovrunConfig, ProviderKind};
use crate::io::process::{ProcessLimits, run_command_with_timeout, shell_command};
use crate::io::task_log::TaskLog;

pub use command::CommandProvider;
pub use llvm_cov::{LlvmCovProvider, parse_export_summary};
pub use none::NoCoverage;

/// Lifecycle hooks for one coverage backend.
///
/// Hooks receive a [`TaskLog`] scoped to that single call. A hook signals a
/// reported failure by setting a positive code on the log, and an
/// infrastructure failure by returning `Err` (or setting a negative code).
pub trait CoverageProvider: Send + Sync {
    /// Short identifier, e.g. "llvm-cov".
    fn name(&self) -> &str;

    /// File name of the coverage artifact, placed in the run's output directory.
    fn default_filename(&self) -> &str;

    /// Unit name used in descriptions, e.g. "lines".
    fn display_units(&self) -> &str;

    /// Decorate a binary before it runs.
    fn instrument_binary(&self, log: &mut TaskLog, binary: &Path) -> Result<()> {
        let _ = binary;
        log.write_line("No instrumentation is required.");
        Ok(())
    }

    /// Initialize a coverage session writing to `coverage_filename`.
    fn start_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        let _ = (log, coverage_filename);
        Ok(())
    }

    /// Run the test command line.
    fn execute(
        &self,
        command_line: &str,
        limits: &ProcessLimits,
    ) -> Result<(ExecuteResult, String)> {
        execute_command(shell_command(command_line), limits)
    }

    /// Finish the coverage session started by [`CoverageProvider::start_coverage`].
    fn stop_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        let _ = (log, coverage_filename);
        Ok(())
    }

    /// Read covered / not-covered counts for one binary from the artifact.
    fn extract_coverage_info(
        &self,
        log: &mut TaskLog,
        context: &ExecutionContext,
        coverage_filename: &Path,
        binary: &Path,
    ) -> Result<CoverageCounts>;
}

/// Run `cmd` and wrap its exit code in an [`ExecuteResult`] without coverage.
pub fn execute_command(cmd: Command, limits: &ProcessLimits) -> Result<(ExecuteResult, String)> {
    let start = Instant::now();
    let output = run_command_with_timeout(cmd, limits)?;
    let short_desc = output
        .timed_out
        .then(|| format!("Timed out after {}s", limits.timeout.as_secs()));

    debug!(result = output.result_code(), "test command finished");
    Ok((
        ExecuteResult::new(output.result_code(), start.elapsed(), short_desc),
        output.combined_text(),
    ))
}

/// Build the provider selected by `config`.
pub fn build_provider(config: &CovrunConfig) -> Box<dyn CoverageProvider> {
    let limits = config.tool_limits();
    match config.provider {
        ProviderKind::None => Box::new(NoCoverage),
        ProviderKind::LlvmCov => Box::new(LlvmCovProvider::new(config.llvm_cov.clone(), limits)),
        ProviderKind::Command => Box::new(CommandProvider::new(config.command.clone(), limits)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_provider_follows_config() {
        let mut cfg = CovrunConfig::default();
        assert_eq!(build_provider(&cfg).name(), "none");

        cfg.provider = ProviderKind::LlvmCov;
        let provider = build_provider(&cfg);
        assert_eq!(provider.name(), "llvm-cov");
        assert_eq!(provider.default_filename(), "coverage.profdata");
        assert_eq!(provider.display_units(), "lines");
    }

    #[test]
    fn default_instrumentation_is_a_logged_no_op() {
        let mut log = TaskLog::new();
        NoCoverage
            .instrument_binary(&mut log, Path::new("out/a_test"))
            .expect("instrument");
        assert_eq!(log.result(), 0);
        assert_eq!(log.output(), "No instrumentation is required.\n");
    }

    #[cfg(unix)]
    #[test]
    fn default_execute_wraps_exit_code() {
        let (result, output) = NoCoverage
            .execute("echo ran; exit 2", &ProcessLimits::default())
            .expect("execute");
        assert_eq!(result.result_code, 2);
        assert!(result.short_desc.is_none());
        assert!(result.coverage.is_none());
        assert_eq!(output, "ran\n");
    }
}
