//! Results returned from a pipeline run.

use super::aggregate::Dataset;
use super::lister::ShardListing;
use super::metrics::MetricsSnapshot;
use crate::error::PipelineError;
use crate::run::{RunId, ShardKey};

/// A shard that failed in some stage, with the error it raised.
#[derive(Debug)]
pub struct ShardFailure {
    pub key: ShardKey,
    pub error: PipelineError,
}

/// Outcome of deleting a run's shards.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Keys removed by this cleanup
    pub deleted: Vec<ShardKey>,

    /// Keys that were already gone
    pub missing: Vec<ShardKey>,

    /// Keys whose delete failed
    pub failures: Vec<ShardFailure>,
}

impl CleanupReport {
    /// True when no key under the run prefix is left behind.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Keys that no longer exist, deleted now or earlier.
    pub fn removed(&self) -> usize {
        self.deleted.len() + self.missing.len()
    }
}

/// What happened during a run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,

    /// Shards and auxiliary objects found after the unload
    pub listing: ShardListing,

    /// Shards that failed to fetch, parse or transform
    pub failures: Vec<ShardFailure>,

    /// Shards never processed because the run was cancelled
    pub skipped: Vec<ShardKey>,

    /// Run-level error, if the dataset is not the complete result
    pub error: Option<PipelineError>,

    pub cleanup: CleanupReport,

    pub metrics: MetricsSnapshot,
}

impl RunReport {
    /// True when every shard contributed to the dataset and cleanup finished.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failures.is_empty() && self.skipped.is_empty() && self.cleanup.is_complete()
    }
}

/// Dataset plus the report of the run that produced it.
#[derive(Debug)]
pub struct PipelineOutput {
    pub dataset: Dataset,
    pub report: RunReport,
}

impl PipelineOutput {
    /// The dataset, or the run-level error when the run did not complete.
    pub fn into_result(self) -> Result<Dataset, PipelineError> {
        match self.report.error {
            Some(e) => Err(e),
            None => Ok(self.dataset),
        }
    }
}
