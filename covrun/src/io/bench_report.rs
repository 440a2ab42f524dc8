//! Loader for benchmark reports produced by test-framework adapters.
//!
//! An adapter writes one JSON report per binary. Timings keep the unit the
//! framework printed; they are normalized to [`Units::CANONICAL`] here, and an
//! unknown unit rejects the whole report.
//!
//! ```json
//! {
//!   "benchmarks": {
//!     "Add_UnitTest": [{
//!       "name": "Add - 1 + 2",
//!       "source_filename": "UnitTests/Add_UnitTest.cpp",
//!       "source_line": 17,
//!       "extractor": "Catch v3.1.0",
//!       "samples": 100,
//!       "iterations": 5210,
//!       "mean": {"value": 5.98, "units": "ns"},
//!       "low_mean": {"value": 5.96, "units": "ns"},
//!       "high_mean": {"value": 6.02, "units": "ns"},
//!       "deviation": {"value": 0.12, "units": "ns"}
//!     }]
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::core::benchmark::{BenchmarkSet, BenchmarkStat, Units, convert_time};

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    benchmarks: BTreeMap<String, Vec<RawBenchmark>>,
}

#[derive(Debug, Deserialize)]
struct RawBenchmark {
    name: String,
    source_filename: PathBuf,
    source_line: u32,
    extractor: String,
    samples: u64,
    iterations: u64,
    mean: RawTiming,
    low_mean: RawTiming,
    high_mean: RawTiming,
    deviation: RawTiming,
}

#[derive(Debug, Deserialize)]
struct RawTiming {
    value: f64,
    units: String,
}

impl RawTiming {
    fn canonical(&self, field: &str) -> Result<f64> {
        let units: Units = self
            .units
            .parse()
            .with_context(|| format!("field '{field}'"))?;
        Ok(convert_time(self.value, units, Units::CANONICAL))
    }
}

impl RawBenchmark {
    fn into_stat(self) -> Result<BenchmarkStat> {
        let context = || format!("benchmark '{}'", self.name);
        let mean = self.mean.canonical("mean").with_context(context)?;
        let low_mean = self.low_mean.canonical("low_mean").with_context(context)?;
        let high_mean = self.high_mean.canonical("high_mean").with_context(context)?;
        let deviation = self.deviation.canonical("deviation").with_context(context)?;

        Ok(BenchmarkStat {
            name: self.name,
            source_filename: self.source_filename,
            source_line: self.source_line,
            extractor: self.extractor,
            low_mean,
            high_mean,
            mean,
            deviation,
            samples: self.samples,
            units: Units::CANONICAL,
            iterations: self.iterations,
        })
    }
}

/// Parse one report into canonical benchmark stats.
pub fn parse_benchmark_report(json: &str) -> Result<BTreeMap<String, Vec<BenchmarkStat>>> {
    let report: Report = serde_json::from_str(json).context("parse benchmark report")?;
    let mut benchmarks = BTreeMap::new();
    for (key, raw) in report.benchmarks {
        let stats = raw
            .into_iter()
            .map(RawBenchmark::into_stat)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("benchmarks for '{key}'"))?;
        if !stats.is_empty() {
            benchmarks.insert(key, stats);
        }
    }
    Ok(benchmarks)
}

pub fn load_benchmark_report(path: &Path) -> Result<BTreeMap<String, Vec<BenchmarkStat>>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_benchmark_report(&contents).with_context(|| format!("load {}", path.display()))
}

/// Load every report and merge them into one set.
///
/// # Panics
///
/// Panics if two reports share a benchmark key.
pub fn collect_benchmarks(paths: &[PathBuf]) -> Result<BenchmarkSet> {
    let mut set = BenchmarkSet::new();
    for path in paths {
        let benchmarks = load_benchmark_report(path)?;
        debug!(path = %path.display(), keys = benchmarks.len(), "merging benchmark report");
        set.merge(benchmarks);
    }
    Ok(set)
}
