//! Sequential or pooled execution of per-shard work.
//!
//! In parallel mode each call builds its own [`WorkerPool`]: a rayon pool of
//! `workers` OS threads. Every worker drives its shard's async I/O with
//! [`Handle::block_on`], so workers block independently while the caller only
//! awaits the final join. The pool is dropped when the call returns, whether
//! the units succeeded, failed or panicked.
//!
//! A unit that panics is reported as [`PipelineError::Panicked`] in both
//! modes, so one bad shard never unwinds past the caller's cleanup.

use crate::config::ExecutionConfig;
use crate::error::{PipelineError, Result};
use crate::run::ShardKey;
use futures::FutureExt;
use rayon::prelude::*;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// How shard units are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One unit at a time, in key order, on the caller's task
    Sequential,

    /// Units spread across a scoped pool of worker threads
    Parallel { workers: usize },
}

impl ExecutionStrategy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        if config.parallel {
            ExecutionStrategy::Parallel {
                workers: config.workers(),
            }
        } else {
            ExecutionStrategy::Sequential
        }
    }
}

/// Result of one shard unit.
#[derive(Debug)]
pub enum UnitOutcome<T> {
    /// The unit ran to completion
    Completed(T),

    /// The unit ran and failed
    Failed(PipelineError),

    /// The unit never ran because the run was cancelled
    Skipped,
}

impl<T> UnitOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitOutcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, UnitOutcome::Skipped)
    }
}

/// Runs one async operation per shard key under an [`ExecutionStrategy`].
#[derive(Debug, Clone)]
pub struct Executor {
    strategy: ExecutionStrategy,

    /// Checked before each unit starts
    cancel: CancellationToken,

    /// Cancel the remaining units after the first failure
    stop_on_failure: bool,
}

impl Executor {
    pub fn new(strategy: ExecutionStrategy, cancel: CancellationToken) -> Self {
        Self {
            strategy,
            cancel,
            stop_on_failure: false,
        }
    }

    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Run `op` for every key. Outcomes are returned in key order.
    ///
    /// Only a failure of the pool itself is returned as an error; unit
    /// failures are reported through [`UnitOutcome::Failed`].
    pub async fn run_all<T, F, Fut>(&self, keys: &[ShardKey], op: F) -> Result<Vec<UnitOutcome<T>>>
    where
        T: Send + 'static,
        F: Fn(ShardKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        match self.strategy {
            ExecutionStrategy::Sequential => {
                let mut outcomes = Vec::with_capacity(keys.len());
                for key in keys {
                    if self.cancel.is_cancelled() {
                        outcomes.push(UnitOutcome::Skipped);
                        continue;
                    }
                    let result = guarded(&op, key.clone()).await;
                    outcomes.push(settle(&self.cancel, self.stop_on_failure, result));
                }
                Ok(outcomes)
            }
            ExecutionStrategy::Parallel { workers } => {
                let pool = WorkerPool::new(workers)?;
                let handle = Handle::current();
                let cancel = self.cancel.clone();
                let stop_on_failure = self.stop_on_failure;
                let keys = keys.to_vec();

                tokio::task::spawn_blocking(move || {
                    pool.run(keys, |key| {
                        if cancel.is_cancelled() {
                            return UnitOutcome::Skipped;
                        }
                        let result = handle.block_on(guarded(&op, key));
                        settle(&cancel, stop_on_failure, result)
                    })
                })
                .await
                .map_err(|e| PipelineError::WorkerPool(format!("worker pool task failed: {}", e)))
            }
        }
    }
}

/// Run one unit, turning a panic into a unit failure.
async fn guarded<T, F, Fut>(op: &F, key: ShardKey) -> Result<T>
where
    F: Fn(ShardKey) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let unit_key = key.clone();
    let unit = AssertUnwindSafe(async move { op(unit_key).await });
    match unit.catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!("Unit for shard {} panicked: {}", key, message);
            Err(PipelineError::Panicked { key, message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn settle<T>(cancel: &CancellationToken, stop_on_failure: bool, result: Result<T>) -> UnitOutcome<T> {
    match result {
        Ok(value) => UnitOutcome::Completed(value),
        Err(e) => {
            if stop_on_failure {
                cancel.cancel();
            }
            UnitOutcome::Failed(e)
        }
    }
}

/// Thread pool scoped to a single batch of shard units.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("shard-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        tracing::debug!("Started worker pool with {} workers", workers);
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `unit` to every key on the pool, returning results in key order.
    /// Consumes the pool so its threads are released once the batch finishes.
    pub fn run<T, F>(self, keys: Vec<ShardKey>, unit: F) -> Vec<T>
    where
        T: Send,
        F: Fn(ShardKey) -> T + Send + Sync,
    {
        self.pool.install(|| keys.into_par_iter().map(unit).collect())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        tracing::debug!("Releasing worker pool with {} workers", self.workers);
    }
}
