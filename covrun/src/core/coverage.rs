//! Coverage arithmetic: per-binary ratios and run-wide totals.

use std::collections::BTreeMap;
use std::path::Path;

use crate::core::types::{BinaryCoverage, CoverageCounts};

/// Covered fraction, treating "no measurable units" as 0% rather than undefined.
pub fn coverage_ratio(counts: CoverageCounts) -> f64 {
    let total = counts.total();
    if total == 0 {
        0.0
    } else {
        counts.covered as f64 / total as f64
    }
}

/// "`covered` of `total` `units` covered".
pub fn describe(counts: CoverageCounts, display_units: &str) -> String {
    format!(
        "{} of {} {} covered",
        counts.covered,
        counts.total(),
        display_units
    )
}

/// Aggregated coverage over every binary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSummary {
    pub totals: CoverageCounts,
    pub ratio: f64,
    pub per_binary: BTreeMap<String, BinaryCoverage>,
}

/// Sum the per-binary counts and compute each ratio.
///
/// Binaries are keyed by file name, or by full path when two binaries share a
/// file name. `binaries` and `counts` are zipped in order.
///
/// # Panics
///
/// Panics if the same path is listed twice.
pub fn summarize<P: AsRef<Path>>(
    binaries: &[P],
    counts: &[CoverageCounts],
    display_units: &str,
) -> CoverageSummary {
    assert_eq!(
        binaries.len(),
        counts.len(),
        "every binary needs coverage counts"
    );

    let names: Vec<String> = binaries
        .iter()
        .map(|binary| file_name(binary.as_ref()))
        .collect();
    let mut name_uses: BTreeMap<&str, usize> = BTreeMap::new();
    for name in &names {
        *name_uses.entry(name.as_str()).or_default() += 1;
    }

    let mut totals = CoverageCounts::default();
    let mut per_binary = BTreeMap::new();

    for ((binary, name), counts) in binaries.iter().zip(&names).zip(counts) {
        totals.covered += counts.covered;
        totals.not_covered += counts.not_covered;

        let key = if name_uses[name.as_str()] > 1 {
            binary.as_ref().display().to_string()
        } else {
            name.clone()
        };
        let coverage = BinaryCoverage {
            ratio: coverage_ratio(*counts),
            description: describe(*counts, display_units),
        };
        let previous = per_binary.insert(key, coverage);
        assert!(
            previous.is_none(),
            "binary {} listed more than once",
            binary.as_ref().display()
        );
    }

    CoverageSummary {
        totals,
        ratio: coverage_ratio(totals),
        per_binary,
    }
}

fn file_name(binary: &Path) -> String {
    binary
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_units_is_zero_ratio() {
        assert_eq!(coverage_ratio(CoverageCounts::new(0, 0)), 0.0);
    }

    #[test]
    fn ratio_is_covered_over_total() {
        assert!((coverage_ratio(CoverageCounts::new(7, 3)) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn describe_uses_total_and_units() {
        assert_eq!(
            describe(CoverageCounts::new(8, 2), "lines"),
            "8 of 10 lines covered"
        );
    }

    #[test]
    fn summarize_sums_and_keys_by_file_name() {
        let binaries = ["out/a_test", "out/b_test", "out/c_test"];
        let counts = [
            CoverageCounts::new(10, 0),
            CoverageCounts::new(8, 2),
            CoverageCounts::new(5, 5),
        ];

        let summary = summarize(&binaries, &counts, "lines");
        assert_eq!(summary.totals, CoverageCounts::new(23, 7));
        assert!((summary.ratio - 23.0 / 30.0).abs() < 1e-12);
        assert_eq!(summary.per_binary["a_test"].ratio, 1.0);
        assert!((summary.per_binary["b_test"].ratio - 0.8).abs() < 1e-12);
        assert_eq!(summary.per_binary["c_test"].ratio, 0.5);
        assert_eq!(
            summary.per_binary["c_test"].description,
            "5 of 10 lines covered"
        );
    }

    #[test]
    fn shared_file_names_fall_back_to_full_paths() {
        let binaries = ["out/debug/unit_test", "out/release/unit_test", "out/other_test"];
        let counts = [
            CoverageCounts::new(1, 1),
            CoverageCounts::new(3, 1),
            CoverageCounts::new(2, 0),
        ];

        let summary = summarize(&binaries, &counts, "lines");
        assert_eq!(summary.per_binary.len(), 3);
        assert_eq!(summary.per_binary["out/debug/unit_test"].ratio, 0.5);
        assert_eq!(summary.per_binary["out/release/unit_test"].ratio, 0.75);
        assert_eq!(summary.per_binary["other_test"].ratio, 1.0);
        assert_eq!(summary.totals, CoverageCounts::new(6, 2));
    }

    #[test]
    #[should_panic(expected = "listed more than once")]
    fn duplicate_binary_path_panics() {
        let binaries = ["out/unit_test", "out/unit_test"];
        let counts = [CoverageCounts::new(1, 0), CoverageCounts::new(1, 0)];
        summarize(&binaries, &counts, "lines");
    }

    #[test]
    fn summarize_empty_run_is_zero() {
        let binaries: [&str; 0] = [];
        let summary = summarize(&binaries, &[], "lines");
        assert_eq!(summary.ratio, 0.0);
        assert!(summary.per_binary.is_empty());
    }
}
