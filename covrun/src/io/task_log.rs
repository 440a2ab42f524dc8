//! Per-task log buffer paired with a result code.
//!
//! Every hook and every fan-out task writes into its own `TaskLog`, so
//! concurrent work never shares a sink. The orchestrator stitches the captured
//! text back together afterwards.

use std::fmt::Write as _;
use std::path::Path;

use crate::core::result_code;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskLog {
    result: i32,
    buffer: String,
}

impl TaskLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> i32 {
        self.result
    }

    /// Overwrite the result code.
    pub fn set_result(&mut self, code: i32) {
        self.result = code;
    }

    /// Fold `code` into the current result using the aggregation rule.
    pub fn record_result(&mut self, code: i32) {
        self.result = result_code::combine(self.result, code);
    }

    pub fn write_line(&mut self, line: impl AsRef<str>) {
        self.buffer.push_str(line.as_ref());
        self.buffer.push('\n');
    }

    pub fn write_info(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.buffer, "INFO: {}", message.as_ref());
    }

    pub fn write_error(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.buffer, "ERROR: {}", message.as_ref());
    }

    /// Record an infrastructure failure unless a more severe code is already set.
    pub fn fail_with_error(&mut self, err: &anyhow::Error) {
        self.write_error(format!("{err:#}"));
        self.record_result(result_code::INFRASTRUCTURE_FAILURE);
    }

    /// Append a nested block: heading, then `body` indented by four spaces.
    pub fn write_section(&mut self, heading: &str, body: &str) {
        self.write_line(heading);
        if !body.trim().is_empty() {
            self.buffer.push_str(&indent(body, 4));
            self.buffer.push('\n');
        }
        self.buffer.push('\n');
    }

    /// Append a task's captured output under an underlined path header.
    pub fn write_task_output(&mut self, path: &Path, output: &str) {
        let title = path.display().to_string();
        let underline = "-".repeat(title.chars().count());
        self.write_line(&title);
        self.write_line(&underline);
        if !output.trim().is_empty() {
            self.buffer.push_str(&indent(output, 4));
            self.buffer.push('\n');
        }
        self.buffer.push('\n');
    }

    pub fn output(&self) -> &str {
        &self.buffer
    }

    pub fn into_output(self) -> String {
        self.buffer
    }
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_log_is_successful_and_empty() {
        let log = TaskLog::new();
        assert_eq!(log.result(), result_code::SUCCESS);
        assert!(log.output().is_empty());
    }

    #[test]
    fn record_result_keeps_most_severe() {
        let mut log = TaskLog::new();
        log.record_result(2);
        log.record_result(5);
        assert_eq!(log.result(), 2);
        log.record_result(-1);
        assert_eq!(log.result(), -1);
        log.record_result(3);
        assert_eq!(log.result(), -1);
    }

    #[test]
    fn fail_with_error_writes_chain() {
        let mut log = TaskLog::new();
        let err = anyhow::anyhow!("inner").context("outer");
        log.fail_with_error(&err);
        assert_eq!(log.result(), result_code::INFRASTRUCTURE_FAILURE);
        assert_eq!(log.output(), "ERROR: outer: inner\n");
    }

    #[test]
    fn task_output_is_underlined_and_indented() {
        let mut log = TaskLog::new();
        log.write_task_output(Path::new("out/a"), "line one\nline two\n");
        assert_eq!(log.output(), "out/a\n-----\n    line one\n    line two\n\n");
    }

    #[test]
    fn section_skips_empty_body() {
        let mut log = TaskLog::new();
        log.write_section("Starting Coverage...", "");
        assert_eq!(log.output(), "Starting Coverage...\n\n");
    }
}
