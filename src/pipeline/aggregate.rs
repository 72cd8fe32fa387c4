//! Concatenation of shard batches into one dataset.

use crate::error::{PipelineError, Result};
use arrow::array::ArrayRef;
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Combined tabular result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    batch: RecordBatch,
}

impl Dataset {
    /// Dataset with no columns and no rows.
    pub fn empty() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<RecordBatch> for Dataset {
    fn from(batch: RecordBatch) -> Self {
        Self { batch }
    }
}

/// Concatenate batches in order.
///
/// Zero-column batches (empty shards) are ignored. The rest must agree on
/// column count and names; a column whose type differs between batches is
/// widened to Float64 when all its types are numeric, and to Utf8 otherwise.
/// Null columns take the type of the other batches, or Utf8 if every batch
/// is Null there.
pub fn aggregate(batches: Vec<RecordBatch>) -> Result<Dataset> {
    let batches: Vec<RecordBatch> = batches.into_iter().filter(|b| b.num_columns() > 0).collect();

    let Some(first) = batches.first() else {
        return Ok(Dataset::empty());
    };
    let reference = first.schema();

    for (index, batch) in batches.iter().enumerate().skip(1) {
        let schema = batch.schema();
        if schema.fields().len() != reference.fields().len() {
            return Err(PipelineError::SchemaMismatch {
                index,
                reason: format!(
                    "expected {} columns, found {}",
                    reference.fields().len(),
                    schema.fields().len()
                ),
            });
        }
        for (expected, actual) in reference.fields().iter().zip(schema.fields().iter()) {
            if expected.name() != actual.name() {
                return Err(PipelineError::SchemaMismatch {
                    index,
                    reason: format!("expected column {}, found {}", expected.name(), actual.name()),
                });
            }
        }
    }

    let schema = unified_schema(&batches);
    let batches = batches
        .iter()
        .enumerate()
        .map(|(index, batch)| conform(batch, &schema, index))
        .collect::<Result<Vec<_>>>()?;

    let combined = concat_batches(&schema, &batches).map_err(|e| PipelineError::SchemaMismatch {
        index: 0,
        reason: e.to_string(),
    })?;

    tracing::debug!(
        "Aggregated {} batches into {} rows x {} columns",
        batches.len(),
        combined.num_rows(),
        combined.num_columns()
    );

    Ok(Dataset::from(combined))
}

/// Schema every batch is cast to before concatenation.
fn unified_schema(batches: &[RecordBatch]) -> SchemaRef {
    let reference = batches[0].schema();
    let fields: Vec<Field> = reference
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let data_type = batches
                .iter()
                .map(|b| b.schema().field(i).data_type().clone())
                .reduce(|a, b| widen(&a, &b))
                .unwrap_or_else(|| field.data_type().clone());
            // No shard had a value in this column
            let data_type = match data_type {
                DataType::Null => DataType::Utf8,
                other => other,
            };
            let nullable = batches.iter().any(|b| b.schema().field(i).is_nullable());
            Field::new(field.name(), data_type, nullable)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

fn widen(a: &DataType, b: &DataType) -> DataType {
    match (a, b) {
        _ if a == b => a.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => DataType::Float64,
        _ => DataType::Utf8,
    }
}

fn conform(batch: &RecordBatch, schema: &SchemaRef, index: usize) -> Result<RecordBatch> {
    if batch.schema().as_ref() == schema.as_ref() {
        return Ok(batch.clone());
    }

    let columns = batch
        .columns()
        .iter()
        .zip(schema.fields().iter())
        .map(|(column, field)| cast(column, field.data_type()))
        .collect::<std::result::Result<Vec<ArrayRef>, _>>()
        .map_err(|e| PipelineError::SchemaMismatch {
            index,
            reason: e.to_string(),
        })?;

    RecordBatch::try_new(schema.clone(), columns).map_err(|e| PipelineError::SchemaMismatch {
        index,
        reason: e.to_string(),
    })
}
