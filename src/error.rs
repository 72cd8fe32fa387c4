//! Error taxonomy for the unload pipeline.

use crate::run::ShardKey;
use arrow::error::ArrowError;

/// Errors raised by the pipeline stages.
///
/// Unload, listing, configuration and capability errors are returned to the
/// caller. Everything raised after the shards exist is recorded in the
/// [`RunReport`](crate::pipeline::RunReport) instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("transform requires capabilities not available to workers: {missing:?}")]
    MissingCapabilities { missing: Vec<String> },

    #[error("unload to {destination} failed: {source}")]
    Unload {
        destination: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to list shards under {prefix}: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: object_store::Error,
    },

    #[error("failed to fetch shard {key}: {source}")]
    Fetch {
        key: ShardKey,
        #[source]
        source: object_store::Error,
    },

    #[error("failed to parse shard {key}: {source}")]
    Parse {
        key: ShardKey,
        #[source]
        source: ArrowError,
    },

    #[error("transform failed on shard {key}: {source}")]
    Transform {
        key: ShardKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("processing shard {key} panicked: {message}")]
    Panicked { key: ShardKey, message: String },

    #[error("schema mismatch at batch {index}: {reason}")]
    SchemaMismatch { index: usize, reason: String },

    #[error("failed to delete shard {key}: {source}")]
    Delete {
        key: ShardKey,
        #[source]
        source: object_store::Error,
    },

    #[error("{failed} of {total} shards failed")]
    ShardsFailed { failed: usize, total: usize },

    #[error("worker pool: {0}")]
    WorkerPool(String),

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Fetch { source, .. } => !matches!(
                source,
                object_store::Error::NotFound { .. }
                    | object_store::Error::InvalidPath { .. }
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
            ),
            _ => false,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ShardKey {
        ShardKey::new("bucket", "unload/run/0000_part_00")
    }

    #[test]
    fn test_fetch_not_found_is_not_transient() {
        let err = PipelineError::Fetch {
            key: key(),
            source: object_store::Error::NotFound {
                path: "unload/run/0000_part_00".to_string(),
                source: "missing".into(),
            },
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_fetch_generic_is_transient() {
        let err = PipelineError::Fetch {
            key: key(),
            source: object_store::Error::Generic {
                store: "S3",
                source: "connection reset".into(),
            },
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("s3://bucket/unload/run/0000_part_00"));
    }

    #[test]
    fn test_parse_is_not_transient() {
        let err = PipelineError::Parse {
            key: key(),
            source: ArrowError::CsvError("bad row".to_string()),
        };
        assert!(!err.is_transient());
    }
}
