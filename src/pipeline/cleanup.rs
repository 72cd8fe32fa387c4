//! Deletion of every object written under a run prefix.

use super::executor::{ExecutionStrategy, Executor, UnitOutcome};
use super::metrics::Metrics;
use super::report::{CleanupReport, ShardFailure};
use crate::error::{PipelineError, Result};
use crate::run::ShardKey;
use object_store::{ObjectStore, ObjectStoreExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteStatus {
    Deleted,
    Missing,
}

/// Removes a run's shards from storage.
///
/// Cleanup ignores the run's cancellation token: once the unload has written
/// objects they are always deleted.
pub struct Cleanup {
    store: Arc<dyn ObjectStore>,
    strategy: ExecutionStrategy,
    metrics: Arc<Metrics>,
}

impl Cleanup {
    pub fn new(store: Arc<dyn ObjectStore>, strategy: ExecutionStrategy, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            strategy,
            metrics,
        }
    }

    /// Delete every key. Safe to repeat: keys already gone are reported as missing.
    pub async fn run(&self, keys: &[ShardKey]) -> CleanupReport {
        if keys.is_empty() {
            return CleanupReport::default();
        }

        let outcomes = match self.delete_all(self.strategy, keys).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!("Parallel cleanup unavailable ({}), deleting sequentially", e);
                match self.delete_all(ExecutionStrategy::Sequential, keys).await {
                    Ok(outcomes) => outcomes,
                    Err(e) => {
                        // Sequential execution has no pool to fail
                        tracing::error!("Cleanup failed: {}", e);
                        Vec::new()
                    }
                }
            }
        };

        let mut report = CleanupReport::default();
        for (key, outcome) in keys.iter().zip(outcomes) {
            match outcome {
                UnitOutcome::Completed(DeleteStatus::Deleted) => report.deleted.push(key.clone()),
                UnitOutcome::Completed(DeleteStatus::Missing) => report.missing.push(key.clone()),
                UnitOutcome::Failed(error) => {
                    tracing::warn!("{}", error);
                    report.failures.push(ShardFailure {
                        key: key.clone(),
                        error,
                    });
                }
                UnitOutcome::Skipped => report.failures.push(ShardFailure {
                    key: key.clone(),
                    error: PipelineError::Cancelled,
                }),
            }
        }

        tracing::info!(
            "Cleanup: {} deleted, {} already gone, {} failed",
            report.deleted.len(),
            report.missing.len(),
            report.failures.len()
        );
        report
    }

    async fn delete_all(
        &self,
        strategy: ExecutionStrategy,
        keys: &[ShardKey],
    ) -> Result<Vec<UnitOutcome<DeleteStatus>>> {
        let executor = Executor::new(strategy, CancellationToken::new());
        let store = self.store.clone();
        let metrics = self.metrics.clone();

        executor
            .run_all(keys, move |key| {
                let store = store.clone();
                let metrics = metrics.clone();
                async move { delete_one(store.as_ref(), &metrics, key).await }
            })
            .await
    }
}

async fn delete_one(store: &dyn ObjectStore, metrics: &Metrics, key: ShardKey) -> Result<DeleteStatus> {
    let start = Instant::now();
    let result = store.delete(&key.path).await;
    metrics.add_delete_time(start.elapsed());

    match result {
        Ok(()) => {
            metrics.add_shard_deleted();
            Ok(DeleteStatus::Deleted)
        }
        Err(object_store::Error::NotFound { .. }) => Ok(DeleteStatus::Missing),
        Err(source) => {
            metrics.add_delete_failure();
            Err(PipelineError::Delete { key, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::PutPayload;

    async fn put_keys(store: &dyn ObjectStore, n: usize) -> Vec<ShardKey> {
        let mut keys = Vec::new();
        for i in 0..n {
            let path = Path::from(format!("unload/run/{:04}_part_00", i));
            store.put(&path, PutPayload::from("1,a\n")).await.unwrap();
            keys.push(ShardKey::new("bucket", path));
        }
        keys
    }

    #[tokio::test]
    async fn test_cleanup_deletes_all_keys() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let keys = put_keys(store.as_ref(), 3).await;
        let metrics = Metrics::new();

        let cleanup = Cleanup::new(store.clone(), ExecutionStrategy::Sequential, metrics.clone());
        let report = cleanup.run(&keys).await;

        assert_eq!(report.deleted, keys);
        assert!(report.is_complete());
        assert_eq!(metrics.snapshot().shards_deleted, 3);
        for key in &keys {
            assert!(store.head(&key.path).await.is_err());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_cleanup_deletes_all_keys() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let keys = put_keys(store.as_ref(), 6).await;

        let cleanup = Cleanup::new(store.clone(), ExecutionStrategy::Parallel { workers: 3 }, Metrics::new());
        let report = cleanup.run(&keys).await;

        assert_eq!(report.deleted, keys);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap());
        let keys = put_keys(store.as_ref(), 2).await;

        let cleanup = Cleanup::new(store.clone(), ExecutionStrategy::Sequential, Metrics::new());
        let first = cleanup.run(&keys).await;
        assert_eq!(first.deleted.len(), 2);

        let second = cleanup.run(&keys).await;
        assert!(second.is_complete());
        assert_eq!(second.removed(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_of_nothing() {
        let cleanup = Cleanup::new(Arc::new(InMemory::new()), ExecutionStrategy::Sequential, Metrics::new());
        let report = cleanup.run(&[]).await;
        assert_eq!(report.removed(), 0);
        assert!(report.is_complete());
    }
}
