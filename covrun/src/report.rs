//! Rendering of a finished run for the CLI.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::benchmark::BenchmarkSet;
use crate::core::types::{CoverageResult, ExecuteResult};

#[derive(Serialize)]
struct JsonReport<'a> {
    succeeded: bool,
    result: &'a ExecuteResult,
    #[serde(skip_serializing_if = "no_benchmarks")]
    benchmarks: &'a BenchmarkSet,
}

fn no_benchmarks(benchmarks: &&BenchmarkSet) -> bool {
    benchmarks.is_empty()
}

/// Pretty JSON with a trailing newline.
pub fn render_json(result: &ExecuteResult, benchmarks: &BenchmarkSet) -> Result<String> {
    let report = JsonReport {
        succeeded: result.succeeded(),
        result,
        benchmarks,
    };
    let mut payload = serde_json::to_string_pretty(&report).context("serialize report")?;
    payload.push('\n');
    Ok(payload)
}

pub fn render_human(result: &ExecuteResult, benchmarks: &BenchmarkSet) -> String {
    let mut out = String::new();

    let verdict = if result.result_code == 0 { "passed" } else { "failed" };
    let _ = write!(
        out,
        "Result: {verdict} ({}) in {:.2}s",
        result.result_code,
        result.execution_duration.as_secs_f64()
    );
    if let Some(desc) = &result.short_desc {
        let _ = write!(out, ": {desc}");
    }
    out.push('\n');

    match &result.coverage {
        Some(coverage) => render_coverage(&mut out, coverage),
        None => out.push_str("Coverage: none\n"),
    }

    if !benchmarks.is_empty() {
        out.push_str("Benchmarks:\n");
        for (key, stats) in benchmarks.iter() {
            let _ = writeln!(out, "  {key}");
            for stat in stats {
                let units = stat.units.abbreviation();
                let _ = writeln!(
                    out,
                    "    {}: mean {:.2} {units} (low {:.2}, high {:.2}, dev {:.2}), {} samples x {} iterations",
                    stat.name,
                    stat.mean,
                    stat.low_mean,
                    stat.high_mean,
                    stat.deviation,
                    stat.samples,
                    stat.iterations
                );
            }
        }
    }

    out
}

fn render_coverage(out: &mut String, coverage: &CoverageResult) {
    let (Some(ratio), Some(filename)) = (coverage.coverage_ratio, &coverage.coverage_filename)
    else {
        let _ = write!(out, "Coverage: not collected ({})", coverage.result_code);
        if let Some(desc) = &coverage.short_desc {
            let _ = write!(out, ": {desc}");
        }
        out.push('\n');
        return;
    };

    let _ = writeln!(
        out,
        "Coverage: {:.2}% ({}) in {:.2}s",
        ratio * 100.0,
        filename.display(),
        coverage.duration.as_secs_f64()
    );
    for (name, binary) in coverage.per_binary.iter().flatten() {
        let _ = writeln!(
            out,
            "  {name}: {:.2}% ({})",
            binary.ratio * 100.0,
            binary.description
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::core::types::BinaryCoverage;

    fn collected() -> ExecuteResult {
        let per_binary = BTreeMap::from([(
            "a_test".to_string(),
            BinaryCoverage {
                ratio: 0.8,
                description: "8 of 10 lines covered".to_string(),
            },
        )]);
        ExecuteResult::new(0, Duration::from_millis(1250), None).with_coverage(
            CoverageResult::collected(
                Duration::from_millis(500),
                PathBuf::from("out/coverage.dat"),
                0.8,
                per_binary,
            ),
        )
    }

    #[test]
    fn human_lists_binaries() {
        let text = render_human(&collected(), &BenchmarkSet::new());
        assert_eq!(
            text,
            "Result: passed (0) in 1.25s\n\
             Coverage: 80.00% (out/coverage.dat) in 0.50s\n  \
             a_test: 80.00% (8 of 10 lines covered)\n"
        );
    }

    #[test]
    fn human_reports_uncollected_coverage() {
        let result = ExecuteResult::new(2, Duration::ZERO, Some("2 tests failed".into()))
            .with_coverage(CoverageResult::not_collected(
                -1,
                Duration::ZERO,
                Some("Stopping Coverage Failed".into()),
            ));
        let text = render_human(&result, &BenchmarkSet::new());
        assert!(text.starts_with("Result: failed (2) in 0.00s: 2 tests failed\n"));
        assert!(text.contains("Coverage: not collected (-1): Stopping Coverage Failed\n"));
    }

    #[test]
    fn json_omits_empty_benchmarks() {
        let json = render_json(&collected(), &BenchmarkSet::new()).expect("render");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["succeeded"], serde_json::json!(true));
        assert_eq!(value["result"]["coverage"]["coverage_ratio"], serde_json::json!(0.8));
        assert!(value.get("benchmarks").is_none());
        assert!(json.ends_with('\n'));
    }
}
