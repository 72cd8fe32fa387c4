//! Column-level built-in transforms.

use super::Transform;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Keep only the given columns, in the given order.
#[derive(Debug, Clone)]
pub struct ProjectColumns {
    indices: Vec<usize>,
}

impl ProjectColumns {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }
}

impl Transform for ProjectColumns {
    fn apply(&self, batch: RecordBatch) -> anyhow::Result<RecordBatch> {
        Ok(batch.project(&self.indices)?)
    }

    fn name(&self) -> &str {
        "project_columns"
    }
}

/// Replace the positional `column_N` names with real column names.
///
/// Shards are unloaded without a header row, so this is how query column
/// names are restored.
#[derive(Debug, Clone)]
pub struct RenameColumns {
    names: Vec<String>,
}

impl RenameColumns {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Transform for RenameColumns {
    fn apply(&self, batch: RecordBatch) -> anyhow::Result<RecordBatch> {
        // Empty shards carry no columns to rename
        if batch.num_columns() == 0 {
            return Ok(batch);
        }
        if batch.num_columns() != self.names.len() {
            anyhow::bail!(
                "Cannot rename {} columns with {} names",
                batch.num_columns(),
                self.names.len()
            );
        }

        let schema = batch.schema();
        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .zip(&self.names)
            .map(|(field, name)| field.as_ref().clone().with_name(name))
            .collect();

        Ok(RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            batch.columns().to_vec(),
        )?)
    }

    fn name(&self) -> &str {
        "rename_columns"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::parse_delimited;

    #[test]
    fn test_project_columns() {
        let batch = parse_delimited(b"a,1,x\nb,2,y\n", b',').unwrap();
        let projected = ProjectColumns::new(vec![2, 0]).apply(batch).unwrap();

        assert_eq!(projected.num_columns(), 2);
        assert_eq!(projected.schema().field(0).name(), "column_3");
        assert_eq!(projected.schema().field(1).name(), "column_1");
    }

    #[test]
    fn test_project_out_of_range_fails() {
        let batch = parse_delimited(b"a,1\n", b',').unwrap();
        assert!(ProjectColumns::new(vec![5]).apply(batch).is_err());
    }

    #[test]
    fn test_rename_columns() {
        let batch = parse_delimited(b"a,1\nb,2\n", b',').unwrap();
        let renamed = RenameColumns::new(["name", "count"]).apply(batch).unwrap();

        assert_eq!(renamed.schema().field(0).name(), "name");
        assert_eq!(renamed.schema().field(1).name(), "count");
        assert_eq!(renamed.num_rows(), 2);
    }

    #[test]
    fn test_rename_wrong_arity_fails() {
        let batch = parse_delimited(b"a,1\n", b',').unwrap();
        assert!(RenameColumns::new(["only"]).apply(batch).is_err());
    }

    #[test]
    fn test_rename_empty_shard_passes_through() {
        let batch = parse_delimited(b"", b',').unwrap();
        let renamed = RenameColumns::new(["name"]).apply(batch).unwrap();
        assert_eq!(renamed.num_columns(), 0);
    }
}
