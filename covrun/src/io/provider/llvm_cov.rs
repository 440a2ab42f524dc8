//! LLVM source-based coverage via `llvm-profdata` and `llvm-cov`.
//!
//! Binaries must be built with `-fprofile-instr-generate -fcoverage-mapping`,
//! so no instrumentation step is needed. Each test process writes a raw
//! profile into a per-run directory; stopping merges them into the indexed
//! artifact that extraction reads.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{CoverageProvider, execute_command};
use crate::core::types::{CoverageCounts, ExecuteResult, ExecutionContext};
use crate::io::config::LlvmCovConfig;
use crate::io::process::{ProcessLimits, run_command_with_timeout, shell_command};
use crate::io::task_log::TaskLog;

const RAW_PROFILE_DIR: &str = "profraw";
const RAW_PROFILE_PATTERN: &str = "%p-%m.profraw";

pub struct LlvmCovProvider {
    config: LlvmCovConfig,
    limits: ProcessLimits,
    /// Raw profile directory of the active session.
    raw_dir: Mutex<Option<PathBuf>>,
}

impl LlvmCovProvider {
    pub fn new(config: LlvmCovConfig, limits: ProcessLimits) -> Self {
        Self {
            config,
            limits,
            raw_dir: Mutex::new(None),
        }
    }

    fn raw_dir(&self) -> Option<PathBuf> {
        self.raw_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CoverageProvider for LlvmCovProvider {
    fn name(&self) -> &str {
        "llvm-cov"
    }

    fn default_filename(&self) -> &str {
        "coverage.profdata"
    }

    fn display_units(&self) -> &str {
        "lines"
    }

    fn start_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        let parent = coverage_filename
            .parent()
            .ok_or_else(|| anyhow!("coverage path has no parent {}", coverage_filename.display()))?;
        let raw_dir = parent.join(RAW_PROFILE_DIR);

        if raw_dir.exists() {
            fs::remove_dir_all(&raw_dir)
                .with_context(|| format!("clear raw profiles {}", raw_dir.display()))?;
        }
        fs::create_dir_all(&raw_dir)
            .with_context(|| format!("create raw profile dir {}", raw_dir.display()))?;

        log.write_info(format!("Raw profiles: {}", raw_dir.display()));
        *self.raw_dir.lock().unwrap_or_else(PoisonError::into_inner) = Some(raw_dir);
        Ok(())
    }

    fn execute(
        &self,
        command_line: &str,
        limits: &ProcessLimits,
    ) -> Result<(ExecuteResult, String)> {
        let mut cmd = shell_command(command_line);
        if let Some(raw_dir) = self.raw_dir() {
            cmd.env("LLVM_PROFILE_FILE", raw_dir.join(RAW_PROFILE_PATTERN));
        }
        execute_command(cmd, limits)
    }

    #[instrument(skip_all, fields(coverage = %coverage_filename.display()))]
    fn stop_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        let raw_dir = self
            .raw_dir()
            .ok_or_else(|| anyhow!("coverage session was not started"))?;
        let raw_profiles = list_raw_profiles(&raw_dir)?;
        if raw_profiles.is_empty() {
            bail!("no raw profiles were written to {}", raw_dir.display());
        }
        debug!(profiles = raw_profiles.len(), "merging raw profiles");

        let mut cmd = Command::new(&self.config.profdata);
        cmd.arg("merge")
            .arg("-sparse")
            .args(&raw_profiles)
            .arg("-o")
            .arg(coverage_filename);

        let output = run_command_with_timeout(cmd, &self.limits).context("run llvm-profdata")?;
        log.write_line(output.combined_text().trim_end());
        log.record_result(output.result_code());
        Ok(())
    }

    fn extract_coverage_info(
        &self,
        log: &mut TaskLog,
        context: &ExecutionContext,
        coverage_filename: &Path,
        binary: &Path,
    ) -> Result<CoverageCounts> {
        let mut cmd = Command::new(&self.config.cov);
        cmd.arg("export")
            .arg("-summary-only")
            .arg(format!("-instr-profile={}", coverage_filename.display()))
            .arg(binary);
        if self.config.filter_to_input && context.input.is_dir() {
            cmd.arg(&context.input);
        }

        let output = run_command_with_timeout(cmd, &self.limits).context("run llvm-cov export")?;
        let code = output.result_code();
        if code != 0 {
            log.write_line(output.combined_text().trim_end());
            log.record_result(code);
            return Ok(CoverageCounts::default());
        }

        let counts = parse_export_summary(&output.stdout_text())
            .with_context(|| format!("parse llvm-cov export for {}", binary.display()))?;
        log.write_line(format!(
            "{} of {} lines covered",
            counts.covered,
            counts.total()
        ));
        Ok(counts)
    }
}

#[derive(Debug, Deserialize)]
struct Export {
    data: Vec<ExportData>,
}

#[derive(Debug, Deserialize)]
struct ExportData {
    totals: ExportTotals,
}

#[derive(Debug, Deserialize)]
struct ExportTotals {
    lines: ExportSummary,
}

#[derive(Debug, Deserialize)]
struct ExportSummary {
    count: u64,
    covered: u64,
}

/// Read line totals from `llvm-cov export -summary-only` JSON.
pub fn parse_export_summary(json: &str) -> Result<CoverageCounts> {
    let export: Export = serde_json::from_str(json).context("parse export json")?;
    let data = export
        .data
        .first()
        .ok_or_else(|| anyhow!("export contains no data"))?;
    let lines = &data.totals.lines;
    if lines.covered > lines.count {
        bail!(
            "covered lines ({}) exceed total lines ({})",
            lines.covered,
            lines.count
        );
    }
    Ok(CoverageCounts::new(lines.covered, lines.count - lines.covered))
}

fn list_raw_profiles(raw_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut profiles = Vec::new();
    for entry in
        fs::read_dir(raw_dir).with_context(|| format!("read {}", raw_dir.display()))?
    {
        let path = entry.context("read entry")?.path();
        if path.extension().is_some_and(|ext| ext == "profraw") {
            profiles.push(path);
        }
    }
    profiles.sort();
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"{
        "type": "llvm.coverage.json.export",
        "version": "2.0.1",
        "data": [{
            "files": [],
            "totals": {
                "lines": {"count": 40, "covered": 30, "percent": 75},
                "functions": {"count": 4, "covered": 4, "percent": 100}
            }
        }]
    }"#;

    #[test]
    fn parses_line_totals() {
        let counts = parse_export_summary(EXPORT).expect("parse");
        assert_eq!(counts, CoverageCounts::new(30, 10));
    }

    #[test]
    fn rejects_empty_data() {
        let err = parse_export_summary(r#"{"data": []}"#).unwrap_err();
        assert!(err.to_string().contains("no data"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_export_summary("not json").is_err());
    }

    #[test]
    fn start_prepares_empty_raw_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stale = temp.path().join(RAW_PROFILE_DIR).join("old.profraw");
        fs::create_dir_all(stale.parent().expect("parent")).expect("mkdir");
        fs::write(&stale, b"stale").expect("write");

        let provider = LlvmCovProvider::new(LlvmCovConfig::default(), ProcessLimits::default());
        let mut log = TaskLog::new();
        provider
            .start_coverage(&mut log, &temp.path().join("coverage.profdata"))
            .expect("start");

        assert!(!stale.exists());
        assert_eq!(provider.raw_dir(), Some(temp.path().join(RAW_PROFILE_DIR)));
        assert!(log.output().contains("Raw profiles:"));
    }

    #[test]
    fn stop_without_profiles_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let provider = LlvmCovProvider::new(LlvmCovConfig::default(), ProcessLimits::default());
        let coverage = temp.path().join("coverage.profdata");
        let mut log = TaskLog::new();
        provider.start_coverage(&mut log, &coverage).expect("start");

        let err = provider.stop_coverage(&mut log, &coverage).unwrap_err();
        assert!(err.to_string().contains("no raw profiles"));
    }

    #[test]
    fn stop_before_start_fails() {
        let provider = LlvmCovProvider::new(LlvmCovConfig::default(), ProcessLimits::default());
        let mut log = TaskLog::new();
        let err = provider
            .stop_coverage(&mut log, Path::new("coverage.profdata"))
            .unwrap_err();
        assert!(err.to_string().contains("not started"));
    }

    #[cfg(unix)]
    #[test]
    fn execute_points_profiles_at_session_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let provider = LlvmCovProvider::new(LlvmCovConfig::default(), ProcessLimits::default());
        let mut log = TaskLog::new();
        provider
            .start_coverage(&mut log, &temp.path().join("coverage.profdata"))
            .expect("start");

        let (result, output) = provider
            .execute("printf %s \"$LLVM_PROFILE_FILE\"", &ProcessLimits::default())
            .expect("execute");
        assert_eq!(result.result_code, 0);
        assert_eq!(
            output,
            temp.path()
                .join(RAW_PROFILE_DIR)
                .join(RAW_PROFILE_PATTERN)
                .display()
                .to_string()
        );
    }
}
