//! Coverage-aware test runner.
//!
//! `covrun run` instruments the given binaries, runs the test command line
//! inside a coverage session, and prints the outcome. The per-phase run log is
//! written to `covrun.log` in the output directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use covrun::core::benchmark::BenchmarkSet;
use covrun::core::types::{ExecuteResult, ExecutionContext};
use covrun::exit_codes;
use covrun::io::bench_report::collect_benchmarks;
use covrun::io::config::{
    CONFIG_FILENAME, CovrunConfig, ProviderKind, load_config, write_config,
};
use covrun::io::process::shell_join;
use covrun::io::provider::build_provider;
use covrun::io::task_log::TaskLog;
use covrun::logging;
use covrun::orchestrate::{ExecutionOutput, Orchestrator, OrchestratorOptions};
use covrun::report::{render_human, render_json};

const RUN_LOG_FILENAME: &str = "covrun.log";

#[derive(Parser)]
#[command(
    name = "covrun",
    version,
    about = "Run test binaries inside a coverage session"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Instrument binaries, run the tests, and collect coverage.
    Run(RunArgs),
    /// Manage `covrun.toml`.
    Config(ConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory receiving the coverage artifact and run log.
    #[arg(long)]
    output_dir: PathBuf,

    /// Test binary produced by the build (repeatable).
    #[arg(long = "binary", required = true)]
    binaries: Vec<PathBuf>,

    /// Source root the binaries were built from.
    #[arg(long, default_value = ".")]
    input: PathBuf,

    /// Override the configured coverage provider.
    #[arg(long, value_enum)]
    provider: Option<ProviderKind>,

    /// Config file; defaults to `<output-dir>/covrun.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run fan-out phases on a single worker.
    #[arg(long)]
    single_threaded: bool,

    /// Run the tests only, skipping every coverage phase.
    #[arg(long)]
    no_coverage: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Benchmark report written by the tests (repeatable).
    #[arg(long = "benchmarks")]
    benchmarks: Vec<PathBuf>,

    /// Test command line, run through the platform shell. A single argument is
    /// used as-is; several arguments are quoted individually.
    #[arg(last = true, required = true)]
    command_line: Vec<String>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Write a config file with default values.
    #[arg(long)]
    init: bool,

    /// Overwrite an existing file.
    #[arg(short, long)]
    force: bool,

    /// Config file path.
    #[arg(long, default_value = CONFIG_FILENAME)]
    path: PathBuf,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Config(args) => cmd_config(&args),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("create output dir {}", args.output_dir.display()))?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.output_dir.join(CONFIG_FILENAME));
    let cfg = resolve_config(&config_path, &args)?;
    check_binaries(&args.binaries)?;
    info!(config = %config_path.display(), provider = ?cfg.provider, "config loaded");

    let orchestrator =
        Orchestrator::new(build_provider(&cfg), OrchestratorOptions::from_config(&cfg));
    let command_line = shell_join(&args.command_line);
    let context = ExecutionContext::new(args.input, args.output_dir.clone(), args.binaries);

    let started_at = Utc::now();
    let mut log = TaskLog::new();
    let output = if args.no_coverage {
        orchestrator.execute_plain(&mut log, &command_line, &mut progress_printer(1))
    } else {
        orchestrator.execute(
            &mut log,
            &context,
            &command_line,
            &mut progress_printer(orchestrator.num_steps()),
        )
    };

    // From here on the tests have run: later failures are reported but never
    // replace the run's own outcome.
    let log_path = args.output_dir.join(RUN_LOG_FILENAME);
    let log_written = write_run_log(&log_path, &started_at.to_rfc3339(), &log, &output);
    let (rendered, mut exit_code) = finish_run(&output.result, &args.benchmarks, args.json);
    print!("{rendered}");
    if let Err(err) = log_written {
        eprintln!("{err:#}");
        exit_code = worsen(exit_code);
    }
    Ok(exit_code)
}

/// Render the finished run and pick its exit code.
///
/// Benchmark or rendering problems go to stderr and can only turn a passing
/// exit code into a failing one.
fn finish_run(result: &ExecuteResult, benchmark_paths: &[PathBuf], json: bool) -> (String, i32) {
    let mut exit_code = if result.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    };

    let benchmarks = collect_benchmarks(benchmark_paths).unwrap_or_else(|err| {
        eprintln!("{err:#}");
        exit_code = worsen(exit_code);
        BenchmarkSet::new()
    });

    let rendered = if json {
        render_json(result, &benchmarks).unwrap_or_else(|err| {
            eprintln!("{err:#}");
            exit_code = worsen(exit_code);
            render_human(result, &benchmarks)
        })
    } else {
        render_human(result, &benchmarks)
    };
    (rendered, exit_code)
}

fn worsen(exit_code: i32) -> i32 {
    exit_code.max(exit_codes::FAILED)
}

/// Reject arguments that would make the per-binary breakdown ambiguous.
fn check_binaries(binaries: &[PathBuf]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for binary in binaries {
        if !seen.insert(binary) {
            bail!("--binary {} given more than once", binary.display());
        }
    }
    Ok(())
}

/// Load the config file and apply command-line overrides.
fn resolve_config(path: &Path, args: &RunArgs) -> Result<CovrunConfig> {
    if args.config.is_some() && !path.exists() {
        bail!("config file not found: {}", path.display());
    }
    let mut cfg = load_config(path)?;
    if let Some(provider) = args.provider {
        cfg.provider = provider;
    }
    if args.single_threaded {
        cfg.single_threaded = true;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn progress_printer(num_steps: usize) -> impl FnMut(usize, &str) -> bool + Send {
    move |step, status| {
        eprintln!("[{}/{num_steps}] {status}", step + 1);
        true
    }
}

fn write_run_log(
    path: &Path,
    started_at: &str,
    log: &TaskLog,
    output: &ExecutionOutput,
) -> Result<()> {
    let mut contents = format!("covrun run started at {started_at}\n\n");
    contents.push_str(log.output());

    let mut test_output = TaskLog::new();
    test_output.write_section("Test Output", &output.output);
    contents.push_str(test_output.output());

    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn cmd_config(args: &ConfigArgs) -> Result<i32> {
    if !args.init {
        let cfg = load_config(&args.path)?;
        print!("{}", toml::to_string_pretty(&cfg).context("serialize config toml")?);
        return Ok(exit_codes::OK);
    }
    if args.path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", args.path.display());
    }
    write_config(&args.path, &CovrunConfig::default())?;
    println!("{}", args.path.display());
    Ok(exit_codes::OK)
}
