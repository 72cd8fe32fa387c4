//! End-to-end run: unload, list, fetch and transform, aggregate, clean up.
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌───────────┐   ┌─────────┐
//! │  Unload  │──▶│ Fetch + Transform    │──▶│ Aggregate │──▶│ Cleanup │
//! │  + List  │   │ (sequential or pool) │   │           │   │         │
//! └──────────┘   └──────────────────────┘   └───────────┘   └─────────┘
//! ```
//!
//! Errors before the shards exist are returned to the caller. Once the unload
//! has written shards, every failure is recorded in the [`RunReport`] and
//! cleanup always runs.

use super::aggregate::{aggregate, Dataset};
use super::cleanup::Cleanup;
use super::executor::{ExecutionStrategy, Executor, UnitOutcome};
use super::lister::ShardLister;
use super::metrics::{Metrics, MetricsReporter};
use super::report::{PipelineOutput, RunReport, ShardFailure};
use crate::config::{Config, FailurePolicy};
use crate::error::{PipelineError, Result};
use crate::io::ShardFetcher;
use crate::run::{Query, RunId, ShardKey};
use crate::transform::TransformSpec;
use crate::warehouse::Warehouse;
use arrow::record_batch::RecordBatch;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Unload pipeline bound to a warehouse, a store and a configuration.
pub struct Pipeline {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
    config: Arc<Config>,

    /// Optional per-shard transform
    transform: Option<TransformSpec>,

    /// Caller-owned cancellation, checked between shard units
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline. The configuration is validated here.
    pub fn new(warehouse: Arc<dyn Warehouse>, store: Arc<dyn ObjectStore>, config: Config) -> Result<Self> {
        config.validate().map_err(PipelineError::Config)?;

        Ok(Self {
            warehouse,
            store,
            config: Arc::new(config),
            transform: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_transform(mut self, transform: TransformSpec) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `query` under a fresh random run id.
    pub async fn run(&self, query: &Query) -> Result<PipelineOutput> {
        let run_id = RunId::random_with_len(self.config.unload.run_prefix_len);
        self.run_with_id(query, run_id).await
    }

    /// Run `query` with its shards namespaced under `run_id`.
    pub async fn run_with_id(&self, query: &Query, run_id: RunId) -> Result<PipelineOutput> {
        let strategy = ExecutionStrategy::from_config(&self.config.execution);
        self.check_capabilities(strategy)?;

        tracing::info!("Starting run {} ({:?})", run_id, strategy);
        let metrics = Metrics::new();

        let lister = ShardLister::new(self.warehouse.clone(), self.store.clone(), self.config.clone());
        let listing = lister.list_shards(query, &run_id).await?;

        // Shards exist from here on: record errors, never return early
        let (batches, failures, skipped, mut error) = self.fetch_all(&listing.shards, strategy, &metrics).await;

        let dataset = if error.is_some() && self.config.execution.failure_policy != FailurePolicy::BestEffort {
            Dataset::empty()
        } else {
            match aggregate(batches) {
                Ok(dataset) => dataset,
                Err(e) => {
                    tracing::error!("Run {} failed to aggregate: {}", run_id, e);
                    error.get_or_insert(e);
                    Dataset::empty()
                }
            }
        };

        let cleanup = Cleanup::new(self.store.clone(), strategy, metrics.clone())
            .run(&listing.all_keys())
            .await;

        let snapshot = metrics.snapshot();
        if let Some(ref path) = self.config.execution.metrics_output_path {
            if let Err(e) = snapshot.save_to_file(path) {
                tracing::warn!("Failed to save metrics to {}: {}", path, e);
            }
        }

        tracing::info!(
            "Run {} complete: {} rows from {} shards | {}",
            run_id,
            dataset.num_rows(),
            listing.shards.len(),
            snapshot
        );

        Ok(PipelineOutput {
            dataset,
            report: RunReport {
                run_id,
                listing,
                failures,
                skipped,
                error,
                cleanup,
                metrics: snapshot,
            },
        })
    }

    /// Parallel workers only see the capabilities declared in the config.
    fn check_capabilities(&self, strategy: ExecutionStrategy) -> Result<()> {
        let Some(transform) = &self.transform else {
            return Ok(());
        };
        if strategy == ExecutionStrategy::Sequential {
            return Ok(());
        }

        let missing = transform.missing_capabilities(&self.config.execution.required_packages);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::MissingCapabilities { missing })
        }
    }

    /// Fetch and transform every shard, then resolve the outcomes by failure policy.
    async fn fetch_all(
        &self,
        shards: &[ShardKey],
        strategy: ExecutionStrategy,
        metrics: &Arc<Metrics>,
    ) -> (Vec<RecordBatch>, Vec<ShardFailure>, Vec<ShardKey>, Option<PipelineError>) {
        let total = shards.len();
        let policy = self.config.execution.failure_policy;

        tracing::info!("Fetching {} shards ({:?}, {:?})", total, strategy, policy);

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.execution.enable_metrics {
            let reporter = MetricsReporter::new(
                metrics.clone(),
                self.config.execution.metrics_interval_secs,
                total as u64,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        // Fail-fast cancels this run's units without touching the caller's token
        let executor = Executor::new(strategy, self.cancel.child_token())
            .stop_on_failure(policy == FailurePolicy::FailFast);

        let fetcher = Arc::new(ShardFetcher::new(
            self.store.clone(),
            self.config.delimiter_byte(),
            self.config.execution.retry.clone(),
            metrics.clone(),
        ));
        let transform = self.transform.clone();
        let unit_metrics = metrics.clone();

        let outcomes = executor
            .run_all(shards, move |key| {
                let fetcher = fetcher.clone();
                let transform = transform.clone();
                let metrics = unit_metrics.clone();
                async move {
                    let result = process_shard(&fetcher, transform.as_ref(), &metrics, key).await;
                    match &result {
                        Ok(_) => metrics.add_shard_fetched(),
                        Err(_) => metrics.add_shard_failed(),
                    }
                    result
                }
            })
            .await;

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::error!("Shard processing failed: {}", e);
                return (Vec::new(), Vec::new(), Vec::new(), Some(e));
            }
        };

        let mut batches = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        for (key, outcome) in shards.iter().zip(outcomes) {
            match outcome {
                UnitOutcome::Completed(batch) => batches.push(batch),
                UnitOutcome::Failed(error) => failures.push(ShardFailure {
                    key: key.clone(),
                    error,
                }),
                UnitOutcome::Skipped => skipped.push(key.clone()),
            }
        }

        let error = if let Some(first) = failures.first() {
            tracing::error!(
                "{} of {} shards failed (first: {}), {} skipped",
                failures.len(),
                total,
                first.error,
                skipped.len()
            );
            Some(PipelineError::ShardsFailed {
                failed: failures.len(),
                total,
            })
        } else if !skipped.is_empty() {
            tracing::error!("Run cancelled with {} of {} shards unprocessed", skipped.len(), total);
            Some(PipelineError::Cancelled)
        } else {
            None
        };

        (batches, failures, skipped, error)
    }
}

/// Fetch, parse and transform one shard.
async fn process_shard(
    fetcher: &ShardFetcher,
    transform: Option<&TransformSpec>,
    metrics: &Metrics,
    key: ShardKey,
) -> Result<RecordBatch> {
    let batch = fetcher.fetch(&key).await?;

    let transform_start = Instant::now();
    let result = crate::transform::apply(batch, transform);
    metrics.add_transform_time(transform_start.elapsed());

    result.map_err(|source| PipelineError::Transform { key, source })
}
