//! Run-scoped identifiers: the query, the run namespace and shard keys.

use object_store::path::Path;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fmt;

/// Warehouse query text. Opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace for the objects written by a single pipeline run.
///
/// Every shard of a run lives under `<storage prefix>/<run id>/`, so two runs
/// sharing a bucket never see each other's objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// Default length of a generated run id.
    pub const DEFAULT_LEN: usize = 20;

    /// Generate a random alphanumeric run id of the default length.
    pub fn random() -> Self {
        Self::random_with_len(Self::DEFAULT_LEN)
    }

    /// Generate a random alphanumeric run id of `len` characters.
    pub fn random_with_len(len: usize) -> Self {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Use a caller-chosen run id.
    ///
    /// The id becomes a single path segment, so it must be non-empty and must
    /// not contain `/`.
    pub fn new(id: impl Into<String>) -> anyhow::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            anyhow::bail!("Run id must not be empty");
        }
        if id.contains('/') || id == "." || id == ".." {
            anyhow::bail!("Run id '{}' is not a valid path segment", id);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object prefix for this run under `base` (which may be empty).
    pub fn prefix_under(&self, base: &str) -> Path {
        let base = base.trim_matches('/');
        if base.is_empty() {
            Path::from(self.0.as_str())
        } else {
            Path::from(format!("{}/{}", base, self.0))
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of one unloaded shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    /// Bucket holding the shard
    pub bucket: String,

    /// Object path within the bucket
    pub path: Path,
}

impl ShardKey {
    pub fn new(bucket: impl Into<String>, path: impl Into<Path>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_run_id() {
        let a = RunId::random();
        let b = RunId::random();
        assert_eq!(a.as_str().len(), RunId::DEFAULT_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);

        assert_eq!(RunId::random_with_len(32).as_str().len(), 32);
    }

    #[test]
    fn test_run_id_validation() {
        assert!(RunId::new("run-0001").is_ok());
        assert!(RunId::new("").is_err());
        assert!(RunId::new("a/b").is_err());
        assert!(RunId::new("..").is_err());
    }

    #[test]
    fn test_prefix_under() {
        let run = RunId::new("abc").unwrap();
        assert_eq!(run.prefix_under("").as_ref(), "abc");
        assert_eq!(run.prefix_under("unload").as_ref(), "unload/abc");
        assert_eq!(run.prefix_under("/tmp/unload/").as_ref(), "tmp/unload/abc");
    }

    #[test]
    fn test_shard_key_display() {
        let key = ShardKey::new("bucket", "unload/abc/0000_part_00");
        assert_eq!(key.to_string(), "s3://bucket/unload/abc/0000_part_00");
        assert_eq!(key.path.as_ref(), "unload/abc/0000_part_00");
    }
}
