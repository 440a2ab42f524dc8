//! Externally scripted coverage backend.
//!
//! Each hook runs a configured argv template; an empty template falls back to
//! the trait default. Useful for wrapping sampling profilers or vendor tools
//! that already ship their own CLI.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};

use super::CoverageProvider;
use crate::core::types::{CoverageCounts, ExecutionContext};
use crate::io::config::CommandCoverageConfig;
use crate::io::process::{CommandOutput, ProcessLimits, argv_command, run_command_with_timeout};
use crate::io::task_log::TaskLog;

pub struct CommandProvider {
    config: CommandCoverageConfig,
    limits: ProcessLimits,
}

/// Values substituted into argv templates.
#[derive(Debug, Default)]
struct Placeholders<'a> {
    binary: Option<&'a Path>,
    coverage: Option<&'a Path>,
    input: Option<&'a Path>,
    output_dir: Option<&'a Path>,
}

impl Placeholders<'_> {
    fn expand(&self, template: &str) -> String {
        let mut expanded = template.to_string();
        for (key, value) in [
            ("{binary}", self.binary),
            ("{coverage}", self.coverage),
            ("{input}", self.input),
            ("{output_dir}", self.output_dir),
        ] {
            if let Some(value) = value {
                expanded = expanded.replace(key, &value.display().to_string());
            }
        }
        expanded
    }
}

impl CommandProvider {
    pub fn new(config: CommandCoverageConfig, limits: ProcessLimits) -> Self {
        Self { config, limits }
    }

    /// Run one hook's template, logging its output and folding its exit code into `log`.
    fn run_hook(
        &self,
        log: &mut TaskLog,
        template: &[String],
        placeholders: &Placeholders<'_>,
    ) -> Result<CommandOutput> {
        let argv: Vec<String> = template
            .iter()
            .map(|arg| placeholders.expand(arg))
            .collect();
        log.write_info(format!("Running: {}", argv.join(" ")));

        let output = run_command_with_timeout(argv_command(&argv)?, &self.limits)
            .with_context(|| format!("run {}", argv[0]))?;
        let text = output.combined_text();
        if !text.trim().is_empty() {
            log.write_line(text.trim_end());
        }
        log.record_result(output.result_code());
        Ok(output)
    }
}

impl CoverageProvider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    fn default_filename(&self) -> &str {
        &self.config.default_filename
    }

    fn display_units(&self) -> &str {
        &self.config.display_units
    }

    fn instrument_binary(&self, log: &mut TaskLog, binary: &Path) -> Result<()> {
        if self.config.instrument.is_empty() {
            log.write_line("No instrumentation is required.");
            return Ok(());
        }
        let placeholders = Placeholders {
            binary: Some(binary),
            ..Placeholders::default()
        };
        self.run_hook(log, &self.config.instrument, &placeholders)?;
        Ok(())
    }

    fn start_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        if self.config.start.is_empty() {
            return Ok(());
        }
        let placeholders = Placeholders {
            coverage: Some(coverage_filename),
            output_dir: coverage_filename.parent(),
            ..Placeholders::default()
        };
        self.run_hook(log, &self.config.start, &placeholders)?;
        Ok(())
    }

    fn stop_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        if self.config.stop.is_empty() {
            return Ok(());
        }
        let placeholders = Placeholders {
            coverage: Some(coverage_filename),
            output_dir: coverage_filename.parent(),
            ..Placeholders::default()
        };
        self.run_hook(log, &self.config.stop, &placeholders)?;
        Ok(())
    }

    fn extract_coverage_info(
        &self,
        log: &mut TaskLog,
        context: &ExecutionContext,
        coverage_filename: &Path,
        binary: &Path,
    ) -> Result<CoverageCounts> {
        if self.config.extract.is_empty() {
            bail!("no extract command configured");
        }
        let placeholders = Placeholders {
            binary: Some(binary),
            coverage: Some(coverage_filename),
            input: Some(&context.input),
            output_dir: Some(&context.output_dir),
        };
        let output = self.run_hook(log, &self.config.extract, &placeholders)?;
        if output.result_code() != 0 {
            return Ok(CoverageCounts::default());
        }
        parse_counts(&output.stdout_text())
    }
}

/// Parse `<covered> <not_covered>` from the last non-empty line.
fn parse_counts(stdout: &str) -> Result<CoverageCounts> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| anyhow!("extract command printed nothing"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [covered, not_covered] = fields.as_slice() else {
        bail!("expected '<covered> <not_covered>', got '{line}'");
    };
    let covered = covered
        .parse()
        .with_context(|| format!("parse covered count '{covered}'"))?;
    let not_covered = not_covered
        .parse()
        .with_context(|| format!("parse not-covered count '{not_covered}'"))?;
    Ok(CoverageCounts::new(covered, not_covered))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn config() -> CommandCoverageConfig {
        CommandCoverageConfig {
            extract: vec!["sh".into(), "-c".into(), "echo 7 3".into()],
            ..CommandCoverageConfig::default()
        }
    }

    fn context(root: &Path) -> ExecutionContext {
        ExecutionContext::new(root.to_path_buf(), root.to_path_buf(), Vec::new())
    }

    #[test]
    fn parse_counts_reads_last_line() {
        let counts = parse_counts("collecting...\n12 4\n\n").expect("parse");
        assert_eq!(counts, CoverageCounts::new(12, 4));
    }

    #[test]
    fn parse_counts_rejects_garbage() {
        assert!(parse_counts("").is_err());
        assert!(parse_counts("12").is_err());
        assert!(parse_counts("twelve 4").is_err());
    }

    #[test]
    fn placeholders_expand_known_keys_only() {
        let placeholders = Placeholders {
            binary: Some(Path::new("out/a_test")),
            coverage: Some(Path::new("out/coverage.dat")),
            ..Placeholders::default()
        };
        assert_eq!(
            placeholders.expand("--bin={binary} --cov={coverage} {input}"),
            "--bin=out/a_test --cov=out/coverage.dat {input}"
        );
    }

    #[test]
    fn empty_instrument_template_is_default_no_op() {
        let provider = CommandProvider::new(config(), ProcessLimits::default());
        let mut log = TaskLog::new();
        provider
            .instrument_binary(&mut log, Path::new("out/a_test"))
            .expect("instrument");
        assert_eq!(log.output(), "No instrumentation is required.\n");
    }

    #[cfg(unix)]
    #[test]
    fn extract_runs_template_and_parses_counts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let provider = CommandProvider::new(config(), ProcessLimits::default());
        let mut log = TaskLog::new();
        let counts = provider
            .extract_coverage_info(
                &mut log,
                &context(temp.path()),
                &temp.path().join("coverage.dat"),
                Path::new("a_test"),
            )
            .expect("extract");
        assert_eq!(counts, CoverageCounts::new(7, 3));
        assert_eq!(log.result(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn failing_hook_records_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker: PathBuf = temp.path().join("instrumented");
        let cfg = CommandCoverageConfig {
            instrument: vec![
                "sh".into(),
                "-c".into(),
                format!("touch {} && exit 4", marker.display()),
            ],
            ..config()
        };
        let provider = CommandProvider::new(cfg, ProcessLimits::default());
        let mut log = TaskLog::new();
        provider
            .instrument_binary(&mut log, Path::new("a_test"))
            .expect("instrument");
        assert_eq!(log.result(), 4);
        assert!(marker.exists());
    }

    #[test]
    fn missing_program_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = CommandCoverageConfig {
            start: vec!["covrun-definitely-missing-binary".into()],
            ..config()
        };
        let provider = CommandProvider::new(cfg, ProcessLimits::default());
        let mut log = TaskLog::new();
        assert!(
            provider
                .start_coverage(&mut log, &temp.path().join("coverage.dat"))
                .is_err()
        );
    }
}
