//! Engine settings stored in `covrun.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::process::{DEFAULT_OUTPUT_LIMIT_BYTES, ProcessLimits};
use crate::io::task_runner::TaskRunOptions;

/// File name looked up in the output directory when no `--config` is given.
pub const CONFIG_FILENAME: &str = "covrun.toml";

/// Which coverage backend drives a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Run the tests without measuring coverage.
    #[default]
    None,
    /// LLVM source-based coverage (`llvm-profdata` + `llvm-cov`).
    LlvmCov,
    /// External commands configured under `[command]`.
    Command,
}

/// Engine configuration (TOML).
///
/// Missing fields default to values suitable for local runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CovrunConfig {
    /// Run fan-out phases on one worker.
    pub single_threaded: bool,

    /// Upper bound on fan-out workers; defaults to available parallelism.
    pub max_workers: Option<usize>,

    /// Wall-clock budget for the test command line, in seconds.
    pub execute_timeout_secs: u64,

    /// Wall-clock budget for each coverage tool invocation, in seconds.
    pub tool_timeout_secs: u64,

    /// Bytes of stdout/stderr kept per child process.
    pub output_limit_bytes: usize,

    /// Keep collecting coverage after the test command reports failures.
    pub continue_after_test_failure: bool,

    pub provider: ProviderKind,

    pub llvm_cov: LlvmCovConfig,

    pub command: CommandCoverageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlvmCovConfig {
    /// `llvm-profdata` executable.
    pub profdata: String,
    /// `llvm-cov` executable.
    pub cov: String,
    /// Restrict reports to sources under the execution context's input root.
    pub filter_to_input: bool,
}

impl Default for LlvmCovConfig {
    fn default() -> Self {
        Self {
            profdata: "llvm-profdata".to_string(),
            cov: "llvm-cov".to_string(),
            filter_to_input: true,
        }
    }
}

/// Argv templates for an externally scripted backend.
///
/// Templates may reference `{binary}`, `{coverage}`, `{input}` and
/// `{output_dir}`. An empty template keeps the hook's default behaviour. The
/// extract command must print `<covered> <not_covered>` on its last line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandCoverageConfig {
    pub default_filename: String,
    pub display_units: String,
    pub instrument: Vec<String>,
    pub start: Vec<String>,
    pub stop: Vec<String>,
    pub extract: Vec<String>,
}

impl Default for CommandCoverageConfig {
    fn default() -> Self {
        Self {
            default_filename: "coverage.dat".to_string(),
            display_units: "lines".to_string(),
            instrument: Vec::new(),
            start: Vec::new(),
            stop: Vec::new(),
            extract: Vec::new(),
        }
    }
}

impl Default for CovrunConfig {
    fn default() -> Self {
        Self {
            single_threaded: false,
            max_workers: None,
            execute_timeout_secs: 60 * 60,
            tool_timeout_secs: 10 * 60,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            continue_after_test_failure: true,
            provider: ProviderKind::None,
            llvm_cov: LlvmCovConfig::default(),
            command: CommandCoverageConfig::default(),
        }
    }
}

impl CovrunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.execute_timeout_secs == 0 {
            return Err(anyhow!("execute_timeout_secs must be > 0"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_workers == Some(0) {
            return Err(anyhow!("max_workers must be > 0 when set"));
        }
        if self.llvm_cov.profdata.trim().is_empty() || self.llvm_cov.cov.trim().is_empty() {
            return Err(anyhow!("llvm_cov.profdata and llvm_cov.cov must be non-empty"));
        }
        if self.provider == ProviderKind::Command {
            let command = &self.command;
            if command.extract.is_empty() || command.extract[0].trim().is_empty() {
                return Err(anyhow!("command.extract must be a non-empty array"));
            }
            for (name, argv) in [
                ("instrument", &command.instrument),
                ("start", &command.start),
                ("stop", &command.stop),
            ] {
                if argv.first().is_some_and(|program| program.trim().is_empty()) {
                    return Err(anyhow!("command.{name} must start with a program"));
                }
            }
            if command.default_filename.trim().is_empty() {
                return Err(anyhow!("command.default_filename must be non-empty"));
            }
        }
        Ok(())
    }

    /// Limits for the test command line.
    pub fn execute_limits(&self) -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_secs(self.execute_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    /// Limits for coverage tool invocations made by providers.
    pub fn tool_limits(&self) -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_secs(self.tool_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    pub fn task_options(&self) -> TaskRunOptions {
        TaskRunOptions {
            single_threaded: self.single_threaded,
            max_workers: self.max_workers,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CovrunConfig::default()`.
pub fn load_config(path: &Path) -> Result<CovrunConfig> {
    if !path.exists() {
        let cfg = CovrunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CovrunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CovrunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, CovrunConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILENAME);
        let cfg = CovrunConfig {
            provider: ProviderKind::LlvmCov,
            max_workers: Some(2),
            ..CovrunConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILENAME);
        fs::write(
            &path,
            "provider = \"command\"\n\n[command]\nextract = [\"cov-report\", \"{binary}\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.provider, ProviderKind::Command);
        assert_eq!(cfg.command.extract, vec!["cov-report", "{binary}"]);
        assert_eq!(cfg.command.display_units, "lines");
        assert!(cfg.continue_after_test_failure);
    }

    #[test]
    fn command_provider_requires_extract() {
        let cfg = CovrunConfig {
            provider: ProviderKind::Command,
            ..CovrunConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("command.extract"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let cfg = CovrunConfig {
            execute_timeout_secs: 0,
            ..CovrunConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = CovrunConfig {
            max_workers: Some(0),
            ..CovrunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
