//! Side-effecting adapters: processes, task fan-out, coverage backends, files.

pub mod bench_report;
pub mod config;
pub mod process;
pub mod provider;
pub mod task_log;
pub mod task_runner;
