//! The fixed, ordered lifecycle of a coverage-enabled test run.

use serde::Serialize;

/// One step of the orchestration. The discriminant order is the step index
/// reported through progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Instrumenting,
    StartingCoverage,
    Testing,
    StoppingCoverage,
    Extracting,
    Finalizing,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Instrumenting,
        Phase::StartingCoverage,
        Phase::Testing,
        Phase::StoppingCoverage,
        Phase::Extracting,
        Phase::Finalizing,
    ];

    /// Number of progress steps reported by a full run.
    pub const COUNT: usize = Self::ALL.len();

    /// 0-based step index used for progress reporting.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Heading used for the phase's section in the run log.
    pub fn heading(self) -> &'static str {
        match self {
            Phase::Instrumenting => "Instrumenting Binaries...",
            Phase::StartingCoverage => "Starting Coverage...",
            Phase::Testing => "Executing Tests...",
            Phase::StoppingCoverage => "Stopping Coverage...",
            Phase::Extracting => "Extracting Coverage Results...",
            Phase::Finalizing => "Finalizing Coverage Results...",
        }
    }

    /// Status text reported when the phase begins.
    pub fn status(self) -> &'static str {
        match self {
            Phase::Instrumenting => "Instrumenting Binaries...",
            Phase::StartingCoverage => "Starting Coverage...",
            Phase::Testing => "Executing Tests...",
            Phase::StoppingCoverage => "Stopping Coverage...",
            Phase::Extracting => "Extracting Coverage Results...",
            Phase::Finalizing => "Finalizing Results...",
        }
    }

    /// Status text for fan-out phases while tasks are still running.
    pub fn remaining_status(self, remaining: usize) -> String {
        let label = match self {
            Phase::Instrumenting => "Instrumenting Binaries",
            Phase::Extracting => "Extracting Coverage Results",
            other => return other.status().to_string(),
        };
        format!("{label} ({})...", remaining_items(remaining))
    }

    /// Short description attached to a result when this phase aborts the run.
    ///
    /// `Testing` has none: the test command's own diagnostic is authoritative.
    pub fn failure_desc(self) -> Option<&'static str> {
        match self {
            Phase::Instrumenting => Some("Instrumentation Failed"),
            Phase::StartingCoverage => Some("Starting Coverage Failed"),
            Phase::Testing => None,
            Phase::StoppingCoverage => Some("Stopping Coverage Failed"),
            Phase::Extracting => Some("Coverage Extraction Failed"),
            Phase::Finalizing => None,
        }
    }
}

/// "no items remaining", "1 item remaining", "3 items remaining".
pub fn remaining_items(remaining: usize) -> String {
    match remaining {
        0 => "no items remaining".to_string(),
        1 => "1 item remaining".to_string(),
        n => format!("{n} items remaining"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_declaration_order() {
        let indices: Vec<usize> = Phase::ALL.iter().map(|phase| phase.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(Phase::COUNT, 6);
    }

    #[test]
    fn only_orchestrator_labelled_phases_have_descriptions() {
        assert_eq!(
            Phase::Instrumenting.failure_desc(),
            Some("Instrumentation Failed")
        );
        assert_eq!(Phase::Testing.failure_desc(), None);
        assert_eq!(Phase::Finalizing.failure_desc(), None);
    }

    #[test]
    fn remaining_status_pluralizes() {
        assert_eq!(
            Phase::Instrumenting.remaining_status(3),
            "Instrumenting Binaries (3 items remaining)..."
        );
        assert_eq!(
            Phase::Extracting.remaining_status(1),
            "Extracting Coverage Results (1 item remaining)..."
        );
        assert_eq!(
            Phase::Extracting.remaining_status(0),
            "Extracting Coverage Results (no items remaining)..."
        );
    }
}
