//! Shard retrieval from object storage.

use crate::config::RetryConfig;
use crate::error::{PipelineError, Result};
use crate::io::csv::parse_delimited;
use crate::pipeline::Metrics;
use crate::run::ShardKey;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use object_store::{ObjectStore, ObjectStoreExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reads shard bodies and parses them into record batches.
pub struct ShardFetcher {
    /// Store holding the unloaded shards
    store: Arc<dyn ObjectStore>,

    /// Field delimiter of the shard text
    delimiter: u8,

    /// Retry configuration for transient storage failures
    retry: RetryConfig,

    /// Metrics collector
    metrics: Arc<Metrics>,
}

impl ShardFetcher {
    /// Create a new shard fetcher.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        delimiter: u8,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            delimiter,
            retry,
            metrics,
        }
    }

    /// Fetch and parse one shard.
    pub async fn fetch(&self, key: &ShardKey) -> Result<RecordBatch> {
        let body = self.fetch_bytes_with_retry(key).await?;

        let parse_start = Instant::now();
        let batch = parse_delimited(&body, self.delimiter).map_err(|source| PipelineError::Parse {
            key: key.clone(),
            source,
        })?;
        self.metrics.add_parse_time(parse_start.elapsed());
        self.metrics.add_rows_parsed(batch.num_rows() as u64);

        Ok(batch)
    }

    /// Retrieve the raw body of one shard.
    pub async fn fetch_bytes(&self, key: &ShardKey) -> Result<Bytes> {
        tracing::trace!("Fetching shard from bucket {} key {}", key.bucket, key.path);

        let fetch_start = Instant::now();
        let body = match self.store.get(&key.path).await {
            Ok(result) => result.bytes().await,
            Err(e) => Err(e),
        }
        .map_err(|source| PipelineError::Fetch {
            key: key.clone(),
            source,
        })?;
        self.metrics.add_fetch_time(fetch_start.elapsed());
        self.metrics.add_bytes_read(body.len() as u64);

        Ok(body)
    }

    /// Retrieve a shard body, retrying transient failures with exponential backoff.
    async fn fetch_bytes_with_retry(&self, key: &ShardKey) -> Result<Bytes> {
        let mut attempt = 0;
        let mut backoff = self.retry.initial_backoff_ms;

        loop {
            match self.fetch_bytes(key).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    if !e.is_transient() || attempt >= self.retry.max_retries {
                        return Err(e);
                    }

                    tracing::warn!(
                        "Shard {} attempt {} failed: {}, retrying in {}ms",
                        key,
                        attempt,
                        e,
                        backoff
                    );
                    self.metrics.add_fetch_retry();

                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = next_backoff(backoff, self.retry.max_backoff_ms);
                }
            }
        }
    }
}

/// Double `current`, capped at `max`.
fn next_backoff(current: u64, max: u64) -> u64 {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::PutPayload;

    async fn store_with(objects: &[(&str, &str)]) -> Arc<dyn ObjectStore> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        for (path, body) in objects {
            store
                .put(&Path::from(*path), PutPayload::from(body.to_string()))
                .await
                .unwrap();
        }
        store
    }

    fn fetcher(store: Arc<dyn ObjectStore>, metrics: Arc<Metrics>) -> ShardFetcher {
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        ShardFetcher::new(store, b',', retry, metrics)
    }

    #[test]
    fn test_next_backoff_doubles_up_to_cap() {
        assert_eq!(next_backoff(100, 5_000), 200);
        assert_eq!(next_backoff(4_000, 5_000), 5_000);
        assert_eq!(next_backoff(u64::MAX / 2 + 1, u64::MAX), u64::MAX);
        assert_eq!(next_backoff(u64::MAX, 10_000), 10_000);
    }

    #[tokio::test]
    async fn test_fetch_parses_shard() {
        let store = store_with(&[("unload/run/0000_part_00", "a1,1\na2,2\n")]).await;
        let metrics = Metrics::new();
        let fetcher = fetcher(store, metrics.clone());

        let key = ShardKey::new("bucket", "unload/run/0000_part_00");
        let batch = fetcher.fetch(&key).await.unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_read, 10);
        assert_eq!(snapshot.rows_parsed, 2);
        assert_eq!(snapshot.fetch_retries, 0);
    }

    #[tokio::test]
    async fn test_fetch_missing_shard_is_fetch_error() {
        let store = store_with(&[]).await;
        let metrics = Metrics::new();
        let fetcher = fetcher(store, metrics.clone());

        let key = ShardKey::new("bucket", "unload/run/missing");
        let err = fetcher.fetch(&key).await.unwrap_err();

        assert!(matches!(err, PipelineError::Fetch { .. }));
        // NotFound is not retried
        assert_eq!(metrics.snapshot().fetch_retries, 0);
    }

    #[tokio::test]
    async fn test_fetch_malformed_shard_is_parse_error() {
        let store = store_with(&[("unload/run/0001_part_00", "a,1\nb,2,3\n")]).await;
        let fetcher = fetcher(store, Metrics::new());

        let key = ShardKey::new("bucket", "unload/run/0001_part_00");
        let err = fetcher.fetch(&key).await.unwrap_err();

        assert!(matches!(err, PipelineError::Parse { .. }));
    }
}
