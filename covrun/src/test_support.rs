//! Test-only helpers: a scripted coverage provider and context builders.
//!
//! [`ScriptedProvider`] never spawns a process. Each hook returns whatever the
//! test configured and appends a line to a shared call log, so tests can
//! assert which phases ran after the provider was moved into an orchestrator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{CoverageCounts, ExecuteResult, ExecutionContext};
use crate::io::process::ProcessLimits;
use crate::io::provider::CoverageProvider;
use crate::io::task_log::TaskLog;

/// Shared record of hook calls, e.g. `"instrument a_test"`.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, call: String) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Calls whose first word is `hook`.
    pub fn calls_to(&self, hook: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split(' ').next() == Some(hook))
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Execution {
    Finished {
        code: i32,
        short_desc: Option<String>,
        output: String,
    },
    Error(String),
}

/// Provider whose every outcome is configured up front.
///
/// Binaries are matched by file name. Unconfigured binaries instrument
/// successfully and extract (0, 0).
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    instrument_codes: BTreeMap<String, i32>,
    start_code: i32,
    stop_code: i32,
    execution: Execution,
    counts: BTreeMap<String, CoverageCounts>,
    extract_codes: BTreeMap<String, i32>,
    calls: CallLog,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            instrument_codes: BTreeMap::new(),
            start_code: 0,
            stop_code: 0,
            execution: Execution::Finished {
                code: 0,
                short_desc: None,
                output: String::new(),
            },
            counts: BTreeMap::new(),
            extract_codes: BTreeMap::new(),
            calls: CallLog::default(),
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instrument_code(mut self, binary: &str, code: i32) -> Self {
        self.instrument_codes.insert(binary.to_string(), code);
        self
    }

    pub fn start_code(mut self, code: i32) -> Self {
        self.start_code = code;
        self
    }

    pub fn stop_code(mut self, code: i32) -> Self {
        self.stop_code = code;
        self
    }

    pub fn test_result(mut self, code: i32, short_desc: Option<&str>, output: &str) -> Self {
        self.execution = Execution::Finished {
            code,
            short_desc: short_desc.map(str::to_string),
            output: output.to_string(),
        };
        self
    }

    /// Make `execute` fail before the command could run.
    pub fn test_error(mut self, message: &str) -> Self {
        self.execution = Execution::Error(message.to_string());
        self
    }

    pub fn counts(mut self, binary: &str, covered: u64, not_covered: u64) -> Self {
        self.counts
            .insert(binary.to_string(), CoverageCounts::new(covered, not_covered));
        self
    }

    pub fn extract_code(mut self, binary: &str, code: i32) -> Self {
        self.extract_codes.insert(binary.to_string(), code);
        self
    }

    /// Handle to the call log; stays valid after the provider is boxed.
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl CoverageProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_filename(&self) -> &str {
        "coverage.dat"
    }

    fn display_units(&self) -> &str {
        "lines"
    }

    fn instrument_binary(&self, log: &mut TaskLog, binary: &Path) -> Result<()> {
        let name = file_name(binary);
        self.calls.push(format!("instrument {name}"));
        log.write_line(format!("instrumented {name}"));
        log.set_result(self.instrument_codes.get(&name).copied().unwrap_or(0));
        Ok(())
    }

    fn start_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        self.calls.push(format!("start {}", file_name(coverage_filename)));
        log.set_result(self.start_code);
        Ok(())
    }

    fn execute(
        &self,
        command_line: &str,
        _limits: &ProcessLimits,
    ) -> Result<(ExecuteResult, String)> {
        self.calls.push(format!("execute {command_line}"));
        match &self.execution {
            Execution::Finished {
                code,
                short_desc,
                output,
            } => Ok((
                ExecuteResult::new(*code, Duration::from_millis(5), short_desc.clone()),
                output.clone(),
            )),
            Execution::Error(message) => Err(anyhow!("{message}")),
        }
    }

    fn stop_coverage(&self, log: &mut TaskLog, coverage_filename: &Path) -> Result<()> {
        self.calls.push(format!("stop {}", file_name(coverage_filename)));
        log.set_result(self.stop_code);
        Ok(())
    }

    fn extract_coverage_info(
        &self,
        log: &mut TaskLog,
        _context: &ExecutionContext,
        _coverage_filename: &Path,
        binary: &Path,
    ) -> Result<CoverageCounts> {
        let name = file_name(binary);
        self.calls.push(format!("extract {name}"));
        log.set_result(self.extract_codes.get(&name).copied().unwrap_or(0));
        Ok(self.counts.get(&name).copied().unwrap_or_default())
    }
}

/// Context whose binaries live under `output_dir`.
pub fn context(output_dir: &Path, binaries: &[&str]) -> ExecutionContext {
    ExecutionContext::new(
        PathBuf::from("src"),
        output_dir.to_path_buf(),
        binaries.iter().map(|name| output_dir.join(name)).collect(),
    )
}
