//! Unload Shards
//!
//! Runs a warehouse query by unloading its result set as delimited shards into
//! object storage, reading the shards back (optionally in parallel), applying a
//! per-shard transform, concatenating them into one Arrow dataset, and deleting
//! the shards.
//!
//! # Architecture
//!
//! - **Warehouse**: issues the UNLOAD into a run-scoped prefix
//! - **I/O**: object store setup, shard fetching and CSV parsing
//! - **Transform**: pure per-shard functions with declared capabilities
//! - **Pipeline**: listing, sequential or pooled execution, aggregation, cleanup and metrics
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use unload_shards::{create_object_store, run_pipeline, Config, PostgresWarehouse, Query};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"unload.yaml".into())?;
//!     let (client, connection) =
//!         tokio_postgres::connect("host=warehouse user=etl", tokio_postgres::NoTls).await?;
//!     tokio::spawn(connection);
//!
//!     let store = create_object_store(&config.storage)?;
//!     let warehouse = Arc::new(PostgresWarehouse::new(client));
//!     let output = run_pipeline(&Query::new("SELECT * FROM events"), warehouse, store, config, None).await?;
//!     println!("{} rows", output.dataset.num_rows());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod run;
pub mod transform;
pub mod warehouse;

pub use config::{Config, ExecutionConfig, FailurePolicy, ListingConfig};
pub use error::PipelineError;
pub use io::create_object_store;
pub use pipeline::{Dataset, Metrics, Pipeline, PipelineOutput, RunReport};
pub use run::{Query, RunId, ShardKey};
pub use transform::{Transform, TransformSpec};
pub use warehouse::{PostgresWarehouse, UnloadRequest, Warehouse};

use object_store::ObjectStore;
use std::sync::Arc;

/// Run `query` once with the given collaborators and configuration.
///
/// Returns `Err` only when nothing was unloaded (invalid configuration,
/// missing worker capabilities, unload or listing failure). Failures after
/// that are reported in [`RunReport::error`] next to an empty dataset.
pub async fn run_pipeline(
    query: &Query,
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
    config: Config,
    transform: Option<TransformSpec>,
) -> Result<PipelineOutput, PipelineError> {
    let mut pipeline = Pipeline::new(warehouse, store, config)?;
    if let Some(transform) = transform {
        pipeline = pipeline.with_transform(transform);
    }

    tracing::info!("Starting unload pipeline");
    pipeline.run(query).await
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_runtime() {
        let runtime = build_runtime(Some(2)).unwrap();
        let value = runtime.block_on(async { tokio::spawn(async { 40 + 2 }).await.unwrap() });
        assert_eq!(value, 42);
    }
}
