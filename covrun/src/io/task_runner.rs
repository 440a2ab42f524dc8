//! Bounded-concurrency fan-out of independent tasks.
//!
//! Each task receives its own [`TaskLog`]; outcomes are returned in submission
//! order no matter which task finishes first. The only state shared between
//! workers is the "remaining" counter, which lives under the same mutex as the
//! caller's progress callback.

use std::sync::{Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::core::result_code;
use crate::io::task_log::TaskLog;

/// How many workers a fan-out may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskRunOptions {
    /// Run every task on a single worker.
    pub single_threaded: bool,
    /// Upper bound on workers; defaults to the available hardware parallelism.
    pub max_workers: Option<usize>,
}

impl TaskRunOptions {
    pub fn serial() -> Self {
        Self {
            single_threaded: true,
            max_workers: None,
        }
    }

    fn worker_count(&self, num_tasks: usize) -> usize {
        if self.single_threaded {
            return 1;
        }
        let limit = self.max_workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        num_tasks.min(limit).max(1)
    }
}

/// What one task left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome<T> {
    pub result: i32,
    pub output: String,
    /// `None` when the task returned an error.
    pub value: Option<T>,
}

/// All outcomes of a fan-out plus their aggregate code.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRun<T> {
    pub result: i32,
    pub outcomes: Vec<TaskOutcome<T>>,
}

impl<T> TaskRun<T> {
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(|outcome| outcome.output.as_str())
    }

    pub fn into_values(self) -> Vec<Option<T>> {
        self.outcomes.into_iter().map(|outcome| outcome.value).collect()
    }
}

struct Progress<P> {
    remaining: usize,
    on_progress: P,
}

/// Run `tasks` on a bounded pool and collect their outcomes in order.
///
/// `on_progress` is called once with the full count before any task is
/// dispatched and once after each task completes with the decremented count.
/// Calls are serialized; the counter never increases and reaches zero exactly
/// once.
///
/// A task returning `Err` is recorded as an infrastructure failure with the
/// error chain appended to its log.
#[instrument(skip_all, fields(tasks = tasks.len()))]
pub fn run_tasks<T, F, P>(
    tasks: Vec<F>,
    options: TaskRunOptions,
    on_progress: P,
) -> Result<TaskRun<T>>
where
    T: Send,
    F: FnOnce(&mut TaskLog) -> Result<T> + Send,
    P: FnMut(usize) + Send,
{
    let progress = Mutex::new(Progress {
        remaining: tasks.len(),
        on_progress,
    });
    report(&progress, false);

    if tasks.is_empty() {
        return Ok(TaskRun {
            result: result_code::SUCCESS,
            outcomes: Vec::new(),
        });
    }

    let workers = options.worker_count(tasks.len());
    debug!(workers, "dispatching tasks");

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("covrun-task-{index}"))
        .build()
        .context("build task pool")?;

    let outcomes: Vec<TaskOutcome<T>> = pool.install(|| {
        tasks
            .into_par_iter()
            .map(|task| {
                let outcome = run_one(task);
                report(&progress, true);
                outcome
            })
            .collect()
    });

    let result = result_code::combine_all(outcomes.iter().map(|outcome| outcome.result));
    debug!(result, "tasks finished");

    Ok(TaskRun { result, outcomes })
}

fn run_one<T, F>(task: F) -> TaskOutcome<T>
where
    F: FnOnce(&mut TaskLog) -> Result<T>,
{
    let mut log = TaskLog::new();
    let value = match task(&mut log) {
        Ok(value) => Some(value),
        Err(err) => {
            log.fail_with_error(&err);
            None
        }
    };

    TaskOutcome {
        result: log.result(),
        output: log.into_output(),
        value,
    }
}

fn report<P: FnMut(usize)>(progress: &Mutex<Progress<P>>, decrement: bool) {
    let mut state = progress.lock().unwrap_or_else(PoisonError::into_inner);
    if decrement {
        assert!(state.remaining > 0, "task completed more than once");
        state.remaining -= 1;
    }
    let remaining = state.remaining;
    (state.on_progress)(remaining);
}
