//! Orchestration of a coverage-enabled test run.
//!
//! A run walks the fixed [`Phase`] list: instrument every binary, start the
//! coverage session, execute the test command line, stop the session, extract
//! per-binary counts, and finalize the aggregate. Instrumenting and extracting
//! fan out across binaries; the other phases run serially. The first failing
//! phase ends the run, and whatever the test command produced is kept.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::coverage::summarize;
use crate::core::phase::Phase;
use crate::core::result_code::{self, CANCELLED, INFRASTRUCTURE_FAILURE};
use crate::core::types::{CoverageCounts, CoverageResult, ExecuteResult, ExecutionContext};
use crate::io::config::CovrunConfig;
use crate::io::process::ProcessLimits;
use crate::io::provider::CoverageProvider;
use crate::io::task_log::TaskLog;
use crate::io::task_runner::{TaskRun, TaskRunOptions, run_tasks};

/// Short description used when the progress callback stops a run.
pub const CANCELLED_DESC: &str = "Cancelled";

/// Progress callback: `(step index, status) -> keep going`.
///
/// Returning `false` stops the run before its next phase. Work already handed
/// to the task pool is never interrupted.
pub type ProgressFn<'a> = dyn FnMut(usize, &str) -> bool + Send + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub tasks: TaskRunOptions,
    pub execute_limits: ProcessLimits,
    /// Keep stopping/extracting coverage when the test command fails.
    pub continue_after_test_failure: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            tasks: TaskRunOptions::default(),
            execute_limits: ProcessLimits::default(),
            continue_after_test_failure: true,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(cfg: &CovrunConfig) -> Self {
        Self {
            tasks: cfg.task_options(),
            execute_limits: cfg.execute_limits(),
            continue_after_test_failure: cfg.continue_after_test_failure,
        }
    }
}

/// The single result of one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub result: ExecuteResult,
    /// Raw text captured from the test command; empty if it never ran.
    pub output: String,
}

pub struct Orchestrator {
    provider: Box<dyn CoverageProvider>,
    options: OrchestratorOptions,
}

struct Tested {
    result: ExecuteResult,
    output: String,
}

enum Flow {
    /// Stopped before the test command ran.
    Aborted {
        code: i32,
        short_desc: Option<String>,
    },
    /// The test command ran but coverage was not collected.
    Incomplete {
        tested: Tested,
        code: i32,
        short_desc: Option<String>,
    },
    Complete {
        tested: Tested,
        coverage: CoverageResult,
    },
}

impl Flow {
    fn aborted(phase: Phase, code: i32) -> Self {
        Flow::Aborted {
            code,
            short_desc: phase.failure_desc().map(str::to_string),
        }
    }

    fn cancelled() -> Self {
        Flow::Aborted {
            code: CANCELLED,
            short_desc: Some(CANCELLED_DESC.to_string()),
        }
    }

    fn incomplete(tested: Tested, phase: Phase, code: i32) -> Self {
        Flow::Incomplete {
            tested,
            code,
            short_desc: phase.failure_desc().map(str::to_string),
        }
    }

    fn cancelled_after(tested: Tested) -> Self {
        Flow::Incomplete {
            tested,
            code: CANCELLED,
            short_desc: Some(CANCELLED_DESC.to_string()),
        }
    }
}

impl Orchestrator {
    pub fn new(provider: Box<dyn CoverageProvider>, options: OrchestratorOptions) -> Self {
        Self { provider, options }
    }

    pub fn provider(&self) -> &dyn CoverageProvider {
        self.provider.as_ref()
    }

    /// Number of progress steps reported by [`Orchestrator::execute`].
    pub fn num_steps(&self) -> usize {
        Phase::COUNT
    }

    /// Run every phase for `context`'s binaries around `command_line`.
    ///
    /// Phase sections are appended to `log`. The returned result is always
    /// fully populated: if the run stopped before the tests executed it carries
    /// the failing phase's code and description and no coverage; otherwise it
    /// wraps the test outcome and a coverage result whose code reflects the
    /// coverage pipeline independently.
    #[instrument(
        skip_all,
        fields(provider = self.provider.name(), binaries = context.output_filenames.len())
    )]
    pub fn execute(
        &self,
        log: &mut TaskLog,
        context: &ExecutionContext,
        command_line: &str,
        on_progress: &mut ProgressFn<'_>,
    ) -> ExecutionOutput {
        let start = Instant::now();
        let flow = self.run_phases(log, context, command_line, on_progress, start);
        let elapsed = start.elapsed();

        let output = match flow {
            Flow::Aborted { code, short_desc } => {
                warn!(code, short_desc = ?short_desc, "run stopped before tests executed");
                ExecutionOutput {
                    result: ExecuteResult::new(code, elapsed, short_desc),
                    output: String::new(),
                }
            }
            Flow::Incomplete {
                tested,
                code,
                short_desc,
            } => {
                warn!(code, short_desc = ?short_desc, "coverage was not collected");
                ExecutionOutput {
                    result: tested
                        .result
                        .with_coverage(CoverageResult::not_collected(code, elapsed, short_desc)),
                    output: tested.output,
                }
            }
            Flow::Complete { tested, coverage } => ExecutionOutput {
                result: tested.result.with_coverage(coverage),
                output: tested.output,
            },
        };

        log.record_result(output.result.result_code);
        if let Some(coverage) = &output.result.coverage {
            log.record_result(coverage.result_code);
        }
        info!(
            result = output.result.result_code,
            duration_secs = elapsed.as_secs_f64(),
            "run finished"
        );
        output
    }

    /// Run the test command line alone, without any coverage phase.
    ///
    /// Reports a single progress step. The result carries a coverage object
    /// whose fields are all absent.
    pub fn execute_plain(
        &self,
        log: &mut TaskLog,
        command_line: &str,
        on_progress: &mut ProgressFn<'_>,
    ) -> ExecutionOutput {
        let start = Instant::now();
        if !on_progress(0, Phase::Testing.status()) {
            return ExecutionOutput {
                result: ExecuteResult::new(
                    CANCELLED,
                    start.elapsed(),
                    Some(CANCELLED_DESC.to_string()),
                ),
                output: String::new(),
            };
        }

        let tested = self.run_tests(log, command_line);
        log.record_result(tested.result.result_code);
        let coverage =
            CoverageResult::not_collected(result_code::SUCCESS, start.elapsed(), None);
        ExecutionOutput {
            result: tested.result.with_coverage(coverage),
            output: tested.output,
        }
    }

    fn run_phases(
        &self,
        log: &mut TaskLog,
        context: &ExecutionContext,
        command_line: &str,
        on_progress: &mut ProgressFn<'_>,
        start: Instant,
    ) -> Flow {
        let provider = self.provider.as_ref();
        let binaries = &context.output_filenames;

        if !begin(on_progress, Phase::Instrumenting) {
            return Flow::cancelled();
        }
        let instrumented = self.fan_out(
            log,
            Phase::Instrumenting,
            binaries,
            on_progress,
            |task_log, binary| provider.instrument_binary(task_log, binary),
        );
        if instrumented.result != result_code::SUCCESS {
            return Flow::aborted(Phase::Instrumenting, instrumented.result);
        }

        if !begin(on_progress, Phase::StartingCoverage) {
            return Flow::cancelled();
        }
        let coverage_filename = context.output_dir.join(provider.default_filename());
        let started = run_serial(log, Phase::StartingCoverage, |phase_log| {
            phase_log.write_info(format!(
                "Coverage Output Filename: {}",
                coverage_filename.display()
            ));
            provider.start_coverage(phase_log, &coverage_filename)
        });
        if started != result_code::SUCCESS {
            return Flow::aborted(Phase::StartingCoverage, started);
        }

        if !begin(on_progress, Phase::Testing) {
            return Flow::cancelled();
        }
        let tested = self.run_tests(log, command_line);
        let test_code = tested.result.result_code;
        if test_code != result_code::SUCCESS && !self.options.continue_after_test_failure {
            return Flow::Incomplete {
                tested,
                code: test_code,
                short_desc: None,
            };
        }

        if !begin(on_progress, Phase::StoppingCoverage) {
            return Flow::cancelled_after(tested);
        }
        let stopped = run_serial(log, Phase::StoppingCoverage, |phase_log| {
            provider.stop_coverage(phase_log, &coverage_filename)
        });
        if stopped != result_code::SUCCESS {
            return Flow::incomplete(tested, Phase::StoppingCoverage, stopped);
        }

        if !begin(on_progress, Phase::Extracting) {
            return Flow::cancelled_after(tested);
        }
        let extracted = self.fan_out(
            log,
            Phase::Extracting,
            binaries,
            on_progress,
            |task_log, binary| {
                provider.extract_coverage_info(task_log, context, &coverage_filename, binary)
            },
        );
        if extracted.result != result_code::SUCCESS {
            return Flow::incomplete(tested, Phase::Extracting, extracted.result);
        }
        let counts = collect_counts(extracted);

        if !begin(on_progress, Phase::Finalizing) {
            return Flow::cancelled_after(tested);
        }
        let summary = summarize(binaries, &counts, provider.display_units());
        let mut finalize_log = TaskLog::new();
        for (name, coverage) in &summary.per_binary {
            finalize_log.write_line(format!(
                "{name}: {:.2}% ({})",
                coverage.ratio * 100.0,
                coverage.description
            ));
        }
        finalize_log.write_line(format!(
            "Total: {:.2}% ({} of {} {} covered)",
            summary.ratio * 100.0,
            summary.totals.covered,
            summary.totals.total(),
            provider.display_units()
        ));
        log.write_section(Phase::Finalizing.heading(), finalize_log.output());

        Flow::Complete {
            tested,
            coverage: CoverageResult::collected(
                start.elapsed(),
                coverage_filename,
                summary.ratio,
                summary.per_binary,
            ),
        }
    }

    /// Run the test command line through the provider.
    ///
    /// A provider error becomes an infrastructure failure described by the
    /// error itself; otherwise the provider's own result is used as-is.
    fn run_tests(&self, log: &mut TaskLog, command_line: &str) -> Tested {
        let start = Instant::now();
        let (result, output) = match self
            .provider
            .execute(command_line, &self.options.execute_limits)
        {
            Ok(executed) => executed,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "test command could not run");
                (
                    ExecuteResult::new(
                        INFRASTRUCTURE_FAILURE,
                        start.elapsed(),
                        Some(format!("{err:#}")),
                    ),
                    String::new(),
                )
            }
        };

        let mut phase_log = TaskLog::new();
        phase_log.write_info(format!("Command Line: {command_line}"));
        phase_log.write_info(format!(
            "Result: {} ({:.2}s)",
            result.result_code,
            result.execution_duration.as_secs_f64()
        ));
        if let Some(desc) = &result.short_desc {
            phase_log.write_info(desc);
        }
        log.write_section(Phase::Testing.heading(), phase_log.output());

        Tested { result, output }
    }

    /// Fan `hook` out across every binary and log each task's output in order.
    fn fan_out<T, F>(
        &self,
        log: &mut TaskLog,
        phase: Phase,
        binaries: &[PathBuf],
        on_progress: &mut ProgressFn<'_>,
        hook: F,
    ) -> TaskRun<T>
    where
        T: Send,
        F: Fn(&mut TaskLog, &Path) -> Result<T> + Sync,
    {
        let hook = &hook;
        let tasks: Vec<_> = binaries
            .iter()
            .map(|binary| move |task_log: &mut TaskLog| hook(task_log, binary.as_path()))
            .collect();

        let mut section = TaskLog::new();
        let run = run_tasks(tasks, self.options.tasks, |remaining| {
            // The pool never observes the return value; cancellation only
            // applies between phases.
            on_progress(phase.index(), &phase.remaining_status(remaining));
        })
        .unwrap_or_else(|err| {
            section.fail_with_error(&err);
            TaskRun {
                result: section.result(),
                outcomes: Vec::new(),
            }
        });

        for (binary, output) in binaries.iter().zip(run.outputs()) {
            section.write_task_output(binary, output);
        }
        log.write_section(phase.heading(), section.output());
        run
    }
}

fn begin(on_progress: &mut ProgressFn<'_>, phase: Phase) -> bool {
    info!(phase = ?phase, "phase started");
    let proceed = on_progress(phase.index(), phase.status());
    if !proceed {
        warn!(phase = ?phase, "progress callback requested stop");
    }
    proceed
}

fn run_serial(
    log: &mut TaskLog,
    phase: Phase,
    hook: impl FnOnce(&mut TaskLog) -> Result<()>,
) -> i32 {
    let mut phase_log = TaskLog::new();
    if let Err(err) = hook(&mut phase_log) {
        phase_log.fail_with_error(&err);
    }
    log.write_section(phase.heading(), phase_log.output());
    phase_log.result()
}

fn collect_counts(extracted: TaskRun<CoverageCounts>) -> Vec<CoverageCounts> {
    let values = extracted.into_values();
    assert!(
        values.iter().all(Option::is_some),
        "coverage extraction succeeded without counts for every binary"
    );
    values.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::provider::NoCoverage;

    fn context(binaries: &[&str]) -> ExecutionContext {
        ExecutionContext::new(
            PathBuf::from("src"),
            PathBuf::from("out"),
            binaries.iter().map(PathBuf::from).collect(),
        )
    }

    #[test]
    fn step_count_matches_phases() {
        let orchestrator = Orchestrator::new(Box::new(NoCoverage), OrchestratorOptions::default());
        assert_eq!(orchestrator.num_steps(), 6);
    }

    #[test]
    fn cancel_before_first_phase_skips_everything() {
        let orchestrator = Orchestrator::new(Box::new(NoCoverage), OrchestratorOptions::default());
        let mut log = TaskLog::new();
        let mut calls = Vec::new();
        let output = orchestrator.execute(
            &mut log,
            &context(&["a_test"]),
            "exit 0",
            &mut |step: usize, status: &str| {
                calls.push((step, status.to_string()));
                false
            },
        );

        assert_eq!(output.result.result_code, CANCELLED);
        assert_eq!(output.result.short_desc.as_deref(), Some(CANCELLED_DESC));
        assert!(output.result.coverage.is_none());
        assert_eq!(calls, vec![(0, "Instrumenting Binaries...".to_string())]);
    }

    #[test]
    #[should_panic(expected = "without counts for every binary")]
    fn missing_counts_after_successful_fan_out_is_a_defect() {
        let run = TaskRun {
            result: 0,
            outcomes: vec![crate::io::task_runner::TaskOutcome {
                result: 0,
                output: String::new(),
                value: None,
            }],
        };
        collect_counts(run);
    }
}
