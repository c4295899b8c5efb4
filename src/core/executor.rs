//! Fixed-size worker pool for independent, I/O-bound tasks.
//!
//! Workers pull from one shared queue. Dispatch stops as soon as either the
//! cancellation token is set or a task reports [`TaskError::HardLimit`];
//! tasks already running are always allowed to finish.

use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::core::lock;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Non-retryable quota condition; aborts the whole run.
    #[error("{0}")]
    HardLimit(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), TaskError>> + Send>;

/// A labelled unit of work. The label names the item in failure reports.
pub struct Task {
    label: String,
    run: TaskFn,
}

impl Task {
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(move || Box::pin(f())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Cancelled,
    HardLimit { label: String, message: String },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub total: usize,
    pub started: usize,
    pub completed: usize,
    pub failures: Vec<TaskFailure>,
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Tasks that were dropped without ever starting.
    pub fn skipped(&self) -> usize {
        self.total - self.started
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Default)]
struct Tally {
    completed: usize,
    failures: Vec<TaskFailure>,
    hard_limit: Option<(String, String)>,
}

struct RunState {
    queue: Mutex<VecDeque<Task>>,
    tally: Mutex<Tally>,
    started: AtomicUsize,
    stop: AtomicBool,
    cancel: Arc<AtomicBool>,
    total: usize,
    progress: Option<ProgressCallback>,
}

impl RunState {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.cancel.load(Ordering::SeqCst)
    }

    fn next_task(&self) -> Option<Task> {
        let mut queue = lock(&self.queue);
        if self.should_stop() {
            return None;
        }
        let task = queue.pop_front()?;
        self.started.fetch_add(1, Ordering::SeqCst);
        Some(task)
    }

    fn record(&self, label: String, result: Result<(), TaskError>) {
        let mut tally = lock(&self.tally);
        match result {
            Ok(()) => {}
            Err(TaskError::HardLimit(message)) => {
                log::error!("{label}: {message}");
                self.stop.store(true, Ordering::SeqCst);
                if tally.hard_limit.is_none() {
                    tally.hard_limit = Some((label, message));
                }
            }
            Err(TaskError::Failed(message)) => {
                log::warn!("{label}: {message}");
                tally.failures.push(TaskFailure { label, message });
            }
        }
        tally.completed += 1;

        // Reported under the tally lock so observers see a strictly increasing count.
        if let Some(callback) = &self.progress {
            callback(Progress {
                completed: tally.completed,
                failed: tally.failures.len(),
                total: self.total,
            });
        }
    }
}

async fn worker(state: Arc<RunState>) {
    while let Some(task) = state.next_task() {
        let Task { label, run } = task;
        let result = run().await;
        state.record(label, result);
    }
}

/// Bounded-concurrency task runner.
pub struct Executor {
    concurrency: usize,
    cancellation_token: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl Executor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Share an externally owned token, e.g. one flipped by a Ctrl+C handler.
    pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::SeqCst);
    }

    /// Run every task, at most `concurrency` at a time.
    ///
    /// Ordinary task failures are collected in the report. A hard limit or a
    /// cancellation ends the run early and is reported through
    /// [`RunReport::outcome`]; only a panicking worker is an `Err`.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunReport, ExecutorError> {
        if self.concurrency == 0 {
            return Err(ExecutorError::InvalidConcurrency);
        }

        let total = tasks.len();
        let state = Arc::new(RunState {
            queue: Mutex::new(tasks.into()),
            tally: Mutex::new(Tally::default()),
            started: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            cancel: self.cancellation_token.clone(),
            total,
            progress: self.progress.clone(),
        });

        let workers = self.concurrency.min(total);
        log::debug!("Running {total} tasks on {workers} workers");

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            pool.spawn(worker(state.clone()));
        }

        let mut panicked = None;
        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                state.stop.store(true, Ordering::SeqCst);
                panicked.get_or_insert_with(|| err.to_string());
            }
        }

        // Drop whatever never started.
        lock(&state.queue).clear();

        if let Some(message) = panicked {
            return Err(ExecutorError::WorkerPanicked(message));
        }

        let started = state.started.load(Ordering::SeqCst);
        let tally = std::mem::take(&mut *lock(&state.tally));
        let outcome = match tally.hard_limit {
            Some((label, message)) => RunOutcome::HardLimit { label, message },
            None if started < total && state.cancel.load(Ordering::SeqCst) => {
                RunOutcome::Cancelled
            }
            None => RunOutcome::Finished,
        };

        Ok(RunReport {
            total,
            started,
            completed: tally.completed,
            failures: tally.failures,
            outcome,
        })
    }
}
