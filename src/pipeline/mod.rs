//! Pipeline orchestration for shard unloading.

mod aggregate;
mod cleanup;
mod executor;
mod lister;
mod metrics;
mod report;
mod stages;


pub use aggregate::{aggregate, Dataset};
pub use cleanup::Cleanup;
pub use executor::{ExecutionStrategy, Executor, UnitOutcome, WorkerPool};
pub use lister::{ShardLister, ShardListing};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use report::{CleanupReport, PipelineOutput, RunReport, ShardFailure};
pub use stages::Pipeline;
