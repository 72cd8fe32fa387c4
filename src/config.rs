//! Configuration for the unload pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the unload pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where shards are unloaded to
    pub storage: StorageConfig,

    /// Unload statement settings
    pub unload: UnloadConfig,

    /// Fetch/cleanup execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket the warehouse unloads into
    pub bucket: String,

    /// Base prefix inside the bucket. Each run writes under `<prefix>/<run id>/`.
    #[serde(default = "default_storage_prefix")]
    pub prefix: String,

    /// Local filesystem root standing in for the bucket.
    /// If set, shards are read from local disk instead of S3.
    #[serde(default)]
    pub local_path: Option<String>,

    /// AWS region (falls back to the environment)
    #[serde(default)]
    pub region: Option<String>,

    /// Custom S3 endpoint (for LocalStack, MinIO, etc.)
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl StorageConfig {
    /// The `s3://` URI of the base prefix.
    pub fn base_uri(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, prefix)
        }
    }
}

/// Unload statement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnloadConfig {
    /// IAM role the warehouse assumes to write to the bucket
    pub iam_role: String,

    /// Field delimiter of the unloaded text
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Length of generated run ids
    #[serde(default = "default_run_prefix_len")]
    pub run_prefix_len: usize,

    /// Which listed objects count as data shards
    #[serde(default)]
    pub listing: ListingConfig,
}

/// Selection of data shards among the objects listed under a run prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Objects whose key ends with one of these suffixes are not data shards
    #[serde(default = "default_exclude_suffixes")]
    pub exclude_suffixes: Vec<String>,

    /// Zero-byte objects are not data shards
    #[serde(default = "default_true")]
    pub skip_empty_objects: bool,

    /// Number of leading objects (in key order) to treat as metadata.
    /// Zero disables the positional skip.
    #[serde(default)]
    pub skip_leading: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            exclude_suffixes: default_exclude_suffixes(),
            skip_empty_objects: true,
            skip_leading: 0,
        }
    }
}

/// What a failing shard does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Attempt every shard; any failure empties the dataset
    #[default]
    FailAtEnd,

    /// Stop dispatching shards after the first failure; the dataset is empty
    FailFast,

    /// Attempt every shard and aggregate the ones that succeeded
    BestEffort,
}

/// Execution configuration shared by the fetch and cleanup phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Run shards on a worker pool instead of the caller's task
    #[serde(default)]
    pub parallel: bool,

    /// Worker pool size (null = number of CPUs)
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Capabilities made available to pool workers
    #[serde(default)]
    pub required_packages: Vec<String>,

    /// Behavior when a shard fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Retry configuration for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Enable metrics reporting
    #[serde(default)]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            worker_count: None,
            required_packages: Vec::new(),
            failure_policy: FailurePolicy::default(),
            retry: RetryConfig::default(),
            enable_metrics: false,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

impl ExecutionConfig {
    /// Sequential execution on the caller's task.
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Parallel execution on `workers` pool threads.
    pub fn parallel(workers: usize) -> Self {
        Self {
            parallel: true,
            worker_count: Some(workers),
            ..Self::default()
        }
    }

    /// Effective worker count, defaulting to the number of CPUs.
    pub fn workers(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Retry configuration for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per shard, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

impl Config {
    /// Minimal configuration for unloading into `bucket` with `iam_role`.
    pub fn new(bucket: impl Into<String>, iam_role: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig {
                bucket: bucket.into(),
                prefix: default_storage_prefix(),
                local_path: None,
                region: None,
                endpoint_url: None,
            },
            unload: UnloadConfig {
                iam_role: iam_role.into(),
                delimiter: default_delimiter(),
                run_prefix_len: default_run_prefix_len(),
                listing: ListingConfig::default(),
            },
            execution: ExecutionConfig::default(),
        }
    }

    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Delimiter as the single byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> u8 {
        self.unload.delimiter as u8
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.bucket.trim().is_empty() {
            anyhow::bail!("Storage bucket must not be empty");
        }
        if self.unload.iam_role.trim().is_empty() {
            anyhow::bail!("Unload IAM role must not be empty");
        }

        let delimiter = self.unload.delimiter;
        if !delimiter.is_ascii() || matches!(delimiter, '\n' | '\r' | '"' | '\'') {
            anyhow::bail!("Delimiter {:?} must be a single ASCII character other than a newline or quote", delimiter);
        }

        if self.unload.run_prefix_len < 8 {
            anyhow::bail!("Run prefix length must be >= 8");
        }
        if self.execution.worker_count == Some(0) {
            anyhow::bail!("Worker count must be > 0");
        }
        if self.execution.retry.max_retries == 0 {
            anyhow::bail!("Max retries must be > 0");
        }
        if self.execution.enable_metrics && self.execution.metrics_interval_secs == 0 {
            anyhow::bail!("Metrics interval must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_storage_prefix() -> String { "unload".to_string() }
fn default_delimiter() -> char { ',' }
fn default_run_prefix_len() -> usize { 20 }
fn default_exclude_suffixes() -> Vec<String> { vec!["manifest".to_string()] }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
fn default_max_retries() -> usize { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 10000 }
