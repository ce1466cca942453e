//! Parallel task scheduler.
//!
//! Runs a [`TaskGraph`] on a bounded rayon pool. A task is dispatched once
//! every predecessor has succeeded; a failure never aborts the run, it only
//! skips the tasks that (transitively) depend on the failed one. Completions
//! flow back to the scheduling thread over a channel, so per-task state is
//! only ever touched from one place.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::TaskError;
use crate::graph::{TaskGraph, TaskId, TaskOutput, TaskRole};

/// Final state of a task within one run
#[derive(Debug)]
pub enum TaskStatus {
    Succeeded,
    Failed(TaskError),
    /// A predecessor failed or was skipped
    Skipped,
    /// Not started because of Ctrl+C
    Cancelled,
}

impl TaskStatus {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }
}

/// Result of one task
#[derive(Debug)]
pub struct TaskResult {
    pub id: TaskId,
    pub status: TaskStatus,
    pub output: TaskOutput,
    pub duration: Duration,
}

/// Lifecycle notifications, delivered on the scheduling thread
#[derive(Debug)]
pub enum TaskEvent<'a> {
    Started(&'a TaskId),
    Finished(&'a TaskResult),
}

pub type TaskObserver = Arc<dyn Fn(&TaskEvent<'_>) + Send + Sync>;

/// Cache-line aligned atomic counter to prevent false sharing
#[repr(align(64))]
pub struct CacheAlignedAtomic(pub AtomicU64);

impl CacheAlignedAtomic {
    pub const fn new(val: u64) -> Self {
        Self(AtomicU64::new(val))
    }
}

/// Counters accumulated over every run of a scheduler
pub struct BuildStats {
    pub files_written: CacheAlignedAtomic,
    pub bytes_written: CacheAlignedAtomic,
    pub failures: CacheAlignedAtomic,
}

impl BuildStats {
    pub fn new() -> Self {
        Self {
            files_written: CacheAlignedAtomic::new(0),
            bytes_written: CacheAlignedAtomic::new(0),
            failures: CacheAlignedAtomic::new(0),
        }
    }

    fn record(&self, result: &TaskResult) {
        match &result.status {
            TaskStatus::Succeeded => {
                self.files_written
                    .0
                    .fetch_add(result.output.written.len() as u64, Ordering::Relaxed);
                self.bytes_written
                    .0
                    .fetch_add(result.output.bytes, Ordering::Relaxed);
            }
            TaskStatus::Failed(_) => {
                self.failures.0.fetch_add(1, Ordering::Relaxed);
            }
            TaskStatus::Skipped | TaskStatus::Cancelled => {}
        }
    }
}

impl Default for BuildStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task outcomes of one run, in graph construction order
#[derive(Debug, Default)]
pub struct BuildReport {
    pub results: Vec<TaskResult>,
    pub duration: Duration,
}

impl BuildReport {
    /// Every task succeeded (and there was at least one)
    pub fn succeeded(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.status.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TaskId, &TaskError)> {
        self.results.iter().filter_map(|r| match &r.status {
            TaskStatus::Failed(e) => Some((&r.id, e)),
            _ => None,
        })
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.id == id)
    }

    pub fn was_cancelled(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(r.status, TaskStatus::Cancelled))
    }

    /// Every file written during the run
    pub fn written(&self) -> impl Iterator<Item = &std::path::PathBuf> {
        self.results
            .iter()
            .filter(|r| r.status.is_success())
            .flat_map(|r| r.output.written.iter())
    }

    /// (has_success, has_failure), ignoring the aggregate node
    pub fn outcome(&self) -> (bool, bool) {
        let mut has_success = false;
        let mut has_failure = false;

        for result in &self.results {
            if result.id.role() == TaskRole::BuildAll {
                continue;
            }
            match &result.status {
                TaskStatus::Succeeded => has_success = true,
                TaskStatus::Failed(_) => has_failure = true,
                TaskStatus::Skipped | TaskStatus::Cancelled => {}
            }
        }

        (has_success, has_failure)
    }
}

/// Bounded-concurrency executor for task graphs
pub struct Scheduler {
    pool: rayon::ThreadPool,
    jobs: usize,
    shutdown: Arc<AtomicBool>,
    stats: BuildStats,
    observer: Option<TaskObserver>,
}

impl Scheduler {
    /// `jobs` is the maximum number of tasks running at once
    pub fn new(jobs: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let jobs = jobs.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("theme-assets-{i}"))
            .build()?;

        Ok(Self {
            pool,
            jobs,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: BuildStats::new(),
            observer: None,
        })
    }

    /// Stop dispatching when `flag` is set
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn with_observer(mut self, observer: TaskObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    #[inline]
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    #[inline]
    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    fn emit(&self, event: TaskEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// Run every task of the graph and report each outcome
    pub fn run(&self, graph: TaskGraph) -> BuildReport {
        let start = Instant::now();
        let schedule = graph.into_schedule();
        let total = schedule.len();

        let mut waiting: Vec<usize> = Vec::with_capacity(total);
        let mut dependents: Vec<Vec<usize>> = Vec::with_capacity(total);
        let mut nodes = Vec::with_capacity(total);
        for (node, preds, deps) in schedule {
            waiting.push(preds);
            dependents.push(deps);
            nodes.push(node);
        }

        let mut results: Vec<Option<TaskResult>> = (0..total).map(|_| None).collect();
        // downstream of a failure, directly or transitively
        let mut blocked = vec![false; total];
        let mut ready: VecDeque<usize> = (0..total).filter(|&i| waiting[i] == 0).collect();
        let mut in_flight = 0usize;

        let (tx, rx) = mpsc::channel::<(usize, Result<TaskOutput, TaskError>, Duration)>();

        loop {
            while let Some(idx) = ready.pop_front() {
                if self.shutdown.load(Ordering::Relaxed) {
                    continue;
                }

                let id = &nodes[idx].id;
                tracing::debug!(task = %id, "dispatching");
                self.emit(TaskEvent::Started(id));

                let action = nodes[idx].action.clone();
                let tx = tx.clone();
                self.pool.spawn(move || {
                    let started = Instant::now();
                    let outcome = action.execute();
                    let _ = tx.send((idx, outcome, started.elapsed()));
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let Ok((idx, outcome, duration)) = rx.recv() else {
                break;
            };
            in_flight -= 1;

            let id = nodes[idx].id.clone();
            let result = match outcome {
                Ok(output) => {
                    tracing::debug!(task = %id, files = output.written.len(), "succeeded");
                    for &dependent in &dependents[idx] {
                        waiting[dependent] -= 1;
                        if waiting[dependent] == 0 {
                            ready.push_back(dependent);
                        }
                    }
                    TaskResult {
                        id,
                        status: TaskStatus::Succeeded,
                        output,
                        duration,
                    }
                }
                Err(e) => {
                    tracing::warn!(task = %id, error = %e, "task failed");
                    let mut stack = dependents[idx].clone();
                    while let Some(dependent) = stack.pop() {
                        if !blocked[dependent] {
                            blocked[dependent] = true;
                            stack.extend_from_slice(&dependents[dependent]);
                        }
                    }
                    TaskResult {
                        id,
                        status: TaskStatus::Failed(e),
                        output: TaskOutput::default(),
                        duration,
                    }
                }
            };

            self.stats.record(&result);
            self.emit(TaskEvent::Finished(&result));
            results[idx] = Some(result);
        }

        // Anything never dispatched sits behind a failure or a cancellation
        let cancelled = self.shutdown.load(Ordering::Relaxed);
        let results = results
            .into_iter()
            .zip(nodes)
            .zip(blocked)
            .map(|((result, node), blocked)| match result {
                Some(result) => result,
                None => {
                    let result = TaskResult {
                        id: node.id,
                        status: if cancelled && !blocked {
                            TaskStatus::Cancelled
                        } else {
                            TaskStatus::Skipped
                        },
                        output: TaskOutput::default(),
                        duration: Duration::ZERO,
                    };
                    self.emit(TaskEvent::Finished(&result));
                    result
                }
            })
            .collect();

        BuildReport {
            results,
            duration: start.elapsed(),
        }
    }
}
