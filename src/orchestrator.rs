//! Concurrent dispatch of sub-requests.
//!
//! Sub-filters are disjoint slices of the request space, so every task is
//! independent: a fixed-size rayon pool drains them as a work queue, each task
//! writes to its own pre-computed artifact name, and a failing task never
//! cancels its siblings.

use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::CdsError;
use crate::expand::SubFilter;
use crate::naming::artifact_name;
use crate::store::Storage;
use crate::transfer::TransferClient;

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub concurrency: usize,
    pub task_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            task_timeout: None,
        }
    }
}

/// Pool-wide stop signal. Tasks that have not started when it fires are
/// recorded as cancelled; running tasks finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Transfer(String),
    Timeout,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transfer(message) => write!(f, "{message}"),
            FailureReason::Timeout => write!(f, "timed out"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Downloaded,
    Skipped,
    Failed(FailureReason),
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub artifact: String,
    pub split_values: Vec<String>,
    pub status: TaskStatus,
    pub elapsed_ms: u64,
}

impl TaskOutcome {
    fn new(sub: &SubFilter, artifact: String, status: TaskStatus, elapsed: Duration) -> Self {
        Self {
            artifact,
            split_values: sub.split_tuple(),
            status,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// One outcome per submitted sub-filter, in submission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl RunReport {
    pub fn downloaded(&self) -> usize {
        self.count(|status| matches!(status, TaskStatus::Downloaded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, TaskStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, TaskStatus::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, TaskStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| pred(&outcome.status))
            .count()
    }
}

struct Job {
    index: usize,
    sub: SubFilter,
    artifact: String,
}

enum Attempt {
    Finished(Result<(), CdsError>),
    Panicked,
    TimedOut,
}

impl Attempt {
    /// Runs one transfer call, turning a panicking client into a failed task.
    fn guarded(transfer: impl FnOnce() -> Result<(), CdsError>) -> Self {
        match panic::catch_unwind(AssertUnwindSafe(transfer)) {
            Ok(result) => Attempt::Finished(result),
            Err(_) => Attempt::Panicked,
        }
    }
}

pub struct DownloadOrchestrator<T: TransferClient> {
    transfer: Arc<T>,
    options: PoolOptions,
    cancel: CancelToken,
}

impl<T: TransferClient + 'static> DownloadOrchestrator<T> {
    pub fn new(transfer: Arc<T>, options: PoolOptions) -> Self {
        Self {
            transfer,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Downloads every sub-filter into `storage`, skipping artifacts that
    /// already exist unless `overwrite` is set. Blocks until all dispatched
    /// tasks are done.
    pub fn run<I>(
        &self,
        product_id: &str,
        sub_filters: I,
        storage: &Storage,
        overwrite: bool,
    ) -> Result<RunReport, CdsError>
    where
        I: IntoIterator<Item = SubFilter>,
    {
        storage.ensure_root()?;

        let mut slots: Vec<Option<TaskOutcome>> = Vec::new();
        let mut jobs = Vec::new();
        for (index, sub) in sub_filters.into_iter().enumerate() {
            let artifact = artifact_name(&sub, product_id);
            if !overwrite && storage.exists(&artifact) {
                info!(artifact = %artifact, "artifact exists, not requesting it again");
                slots.push(Some(TaskOutcome::new(
                    &sub,
                    artifact,
                    TaskStatus::Skipped,
                    Duration::ZERO,
                )));
            } else {
                slots.push(None);
                jobs.push(Job {
                    index,
                    sub,
                    artifact,
                });
            }
        }

        if !jobs.is_empty() {
            let workers = self.options.concurrency.max(1).min(jobs.len());
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("cds-download-{i}"))
                .build()
                .map_err(|err| CdsError::WorkerPool(err.to_string()))?;
            info!(
                product = product_id,
                tasks = jobs.len(),
                workers,
                "dispatching downloads"
            );
            let finished: Vec<(usize, TaskOutcome)> = pool.install(|| {
                jobs.into_par_iter()
                    .map(|job| (job.index, self.execute(product_id, job, storage)))
                    .collect()
            });
            for (index, outcome) in finished {
                slots[index] = Some(outcome);
            }
        }

        Ok(RunReport {
            outcomes: slots.into_iter().flatten().collect(),
        })
    }

    fn execute(&self, product_id: &str, job: Job, storage: &Storage) -> TaskOutcome {
        let Job { sub, artifact, .. } = job;
        if self.cancel.is_cancelled() {
            return TaskOutcome::new(
                &sub,
                artifact,
                TaskStatus::Failed(FailureReason::Cancelled),
                Duration::ZERO,
            );
        }

        let partial = storage.partial_path(&artifact);
        let target = storage.artifact_path(&artifact);
        let start = Instant::now();
        info!(artifact = %artifact, "download started");

        let attempt = match self.options.task_timeout {
            None => Attempt::guarded(|| {
                self.transfer
                    .retrieve(product_id, sub.filter(), partial.as_std_path())
            }),
            Some(timeout) => self.retrieve_with_timeout(product_id, &sub, &partial, timeout),
        };

        let status = match attempt {
            Attempt::Finished(Ok(())) => {
                if !partial.as_std_path().is_file() {
                    TaskStatus::Failed(FailureReason::Transfer(
                        "transfer reported success but wrote no file".to_string(),
                    ))
                } else {
                    match fs::rename(partial.as_std_path(), target.as_std_path()) {
                        Ok(()) => TaskStatus::Downloaded,
                        Err(err) => TaskStatus::Failed(FailureReason::Transfer(err.to_string())),
                    }
                }
            }
            Attempt::Finished(Err(err)) => {
                TaskStatus::Failed(FailureReason::Transfer(err.to_string()))
            }
            Attempt::Panicked => {
                TaskStatus::Failed(FailureReason::Transfer("transfer panicked".to_string()))
            }
            Attempt::TimedOut => TaskStatus::Failed(FailureReason::Timeout),
        };

        let elapsed = start.elapsed();
        match &status {
            TaskStatus::Failed(reason) => {
                let _ = fs::remove_file(partial.as_std_path());
                warn!(artifact = %artifact, %reason, "download failed");
            }
            _ => info!(
                artifact = %artifact,
                elapsed_ms = elapsed.as_millis() as u64,
                "download finished"
            ),
        }
        TaskOutcome::new(&sub, artifact, status, elapsed)
    }

    /// Runs the transfer on a helper thread so the worker can give up on it.
    /// An abandoned transfer keeps running until the client returns, then
    /// removes whatever it wrote to the `.part` path.
    fn retrieve_with_timeout(
        &self,
        product_id: &str,
        sub: &SubFilter,
        partial: &camino::Utf8Path,
        timeout: Duration,
    ) -> Attempt {
        let (tx, rx) = mpsc::channel();
        let transfer = Arc::clone(&self.transfer);
        let product_id = product_id.to_string();
        let request = sub.filter().clone();
        let destination = partial.as_std_path().to_path_buf();

        let spawned = thread::Builder::new()
            .name("cds-transfer".to_string())
            .spawn(move || {
                let attempt =
                    Attempt::guarded(|| transfer.retrieve(&product_id, &request, &destination));
                if tx.send(attempt).is_err() {
                    // the worker already timed out and cleaned up
                    let _ = fs::remove_file(&destination);
                }
            });
        if let Err(err) = spawned {
            return Attempt::Finished(Err(CdsError::WorkerPool(err.to_string())));
        }

        match rx.recv_timeout(timeout) {
            Ok(attempt) => attempt,
            Err(RecvTimeoutError::Timeout) => Attempt::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Attempt::Panicked,
        }
    }
}
