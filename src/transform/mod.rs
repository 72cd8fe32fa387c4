//! Per-shard transforms applied between fetch and aggregation.

mod columns;

pub use columns::{ProjectColumns, RenameColumns};

use arrow::record_batch::RecordBatch;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A pure function over one shard batch.
///
/// Transforms run on pool workers in parallel mode, so they must not rely on
/// state outside what they capture and the capabilities they declare.
pub trait Transform: Send + Sync {
    fn apply(&self, batch: RecordBatch) -> anyhow::Result<RecordBatch>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "transform"
    }
}

impl<F> Transform for F
where
    F: Fn(RecordBatch) -> anyhow::Result<RecordBatch> + Send + Sync,
{
    fn apply(&self, batch: RecordBatch) -> anyhow::Result<RecordBatch> {
        self(batch)
    }
}

/// A transform together with the capabilities it needs on a worker.
#[derive(Clone)]
pub struct TransformSpec {
    transform: Arc<dyn Transform>,
    requires: BTreeSet<String>,
}

impl TransformSpec {
    pub fn new(transform: impl Transform + 'static) -> Self {
        Self {
            transform: Arc::new(transform),
            requires: BTreeSet::new(),
        }
    }

    /// Declare capabilities the transform needs on pool workers.
    pub fn requires<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn required_capabilities(&self) -> impl Iterator<Item = &str> {
        self.requires.iter().map(String::as_str)
    }

    /// Declared capabilities missing from `available`, in sorted order.
    pub fn missing_capabilities(&self, available: &[String]) -> Vec<String> {
        self.requires
            .iter()
            .filter(|cap| !available.contains(cap))
            .cloned()
            .collect()
    }

    pub fn name(&self) -> &str {
        self.transform.name()
    }

    pub fn apply(&self, batch: RecordBatch) -> anyhow::Result<RecordBatch> {
        self.transform.apply(batch)
    }
}

impl std::fmt::Debug for TransformSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformSpec")
            .field("name", &self.name())
            .field("requires", &self.requires)
            .finish()
    }
}

/// Apply `spec` to `batch`, or return the batch unchanged when there is none.
pub fn apply(batch: RecordBatch, spec: Option<&TransformSpec>) -> anyhow::Result<RecordBatch> {
    match spec {
        Some(spec) => spec.apply(batch),
        None => Ok(batch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("column_1", DataType::Int64, true)]));
        let column: ArrayRef = Arc::new(Int64Array::from(values));
        RecordBatch::try_new(schema, vec![column]).unwrap()
    }

    #[test]
    fn test_identity_without_spec() {
        let input = batch(vec![1, 2, 3]);
        let output = apply(input.clone(), None).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_closure_transform() {
        let spec = TransformSpec::new(|batch: RecordBatch| -> anyhow::Result<RecordBatch> {
            Ok(batch.slice(0, 1))
        });
        let output = apply(batch(vec![1, 2, 3]), Some(&spec)).unwrap();
        assert_eq!(output.num_rows(), 1);
    }

    #[test]
    fn test_transform_error_propagates() {
        let spec = TransformSpec::new(|_: RecordBatch| -> anyhow::Result<RecordBatch> {
            anyhow::bail!("boom")
        });
        let err = apply(batch(vec![1]), Some(&spec)).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_missing_capabilities() {
        let spec = TransformSpec::new(ProjectColumns::new(vec![0])).requires(["geo", "arrow"]);

        let available = vec!["arrow".to_string()];
        assert_eq!(spec.missing_capabilities(&available), vec!["geo".to_string()]);

        let available = vec!["arrow".to_string(), "geo".to_string()];
        assert!(spec.missing_capabilities(&available).is_empty());

        let caps: Vec<&str> = spec.required_capabilities().collect();
        assert_eq!(caps, vec!["arrow", "geo"]);
    }
}
