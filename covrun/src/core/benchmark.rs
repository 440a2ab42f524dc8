//! Benchmark statistics, time-unit normalization, and per-run aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Error, bail};
use serde::{Deserialize, Serialize};

/// Time unit reported by a benchmark tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
}

impl Units {
    pub const ALL: [Units; 5] = [
        Units::Nanoseconds,
        Units::Microseconds,
        Units::Milliseconds,
        Units::Seconds,
        Units::Minutes,
    ];

    /// Unit every stored benchmark timing is expressed in.
    pub const CANONICAL: Units = Units::Nanoseconds;

    fn nanoseconds_per_unit(self) -> f64 {
        match self {
            Units::Nanoseconds => 1.0,
            Units::Microseconds => 1_000.0,
            Units::Milliseconds => 1_000_000.0,
            Units::Seconds => 1_000_000_000.0,
            Units::Minutes => 60_000_000_000.0,
        }
    }

    pub fn abbreviation(self) -> &'static str {
        match self {
            Units::Nanoseconds => "ns",
            Units::Microseconds => "us",
            Units::Milliseconds => "ms",
            Units::Seconds => "s",
            Units::Minutes => "min",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

impl FromStr for Units {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let units = match s.trim() {
            "ns" | "nanoseconds" => Units::Nanoseconds,
            "us" | "µs" | "microseconds" => Units::Microseconds,
            "ms" | "milliseconds" => Units::Milliseconds,
            "s" | "seconds" => Units::Seconds,
            "m" | "min" | "minutes" => Units::Minutes,
            other => bail!("unknown time unit '{other}'"),
        };
        Ok(units)
    }
}

/// Convert `value` expressed in `source` units into `dest` units.
pub fn convert_time(value: f64, source: Units, dest: Units) -> f64 {
    if source == dest {
        return value;
    }
    value * source.nanoseconds_per_unit() / dest.nanoseconds_per_unit()
}

/// One measured benchmark case. Timings are in `units`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStat {
    /// Composite "<test name> - <benchmark name>".
    pub name: String,
    pub source_filename: PathBuf,
    pub source_line: u32,
    /// Tool that produced the measurement, e.g. "Catch v3.1.0".
    pub extractor: String,
    pub low_mean: f64,
    pub high_mean: f64,
    pub mean: f64,
    pub deviation: f64,
    pub samples: u64,
    pub units: Units,
    pub iterations: u64,
}

/// Benchmarks collected across every binary of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BenchmarkSet {
    entries: BTreeMap<String, Vec<BenchmarkStat>>,
}

impl BenchmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one binary's benchmarks into the set.
    ///
    /// # Panics
    ///
    /// Panics if a key is already present; benchmark names are unique per run.
    pub fn merge(&mut self, source: BTreeMap<String, Vec<BenchmarkStat>>) {
        for (key, stats) in source {
            assert!(
                !self.entries.contains_key(&key),
                "duplicate benchmark key '{key}'"
            );
            self.entries.insert(key, stats);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&[BenchmarkStat]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<BenchmarkStat>)> {
        self.entries.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<BenchmarkStat>> {
        self.entries
    }
}
