//! Parsing of unloaded delimited text into record batches.
//!
//! Unloaded shards have no header row, so columns are named `column_1`,
//! `column_2`, ... and typed from their content. Only integers and floats
//! are kept as numeric types; every other column is read as text, except a
//! column with no values at all, which stays Null until aggregation.

use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use std::io::Cursor;
use std::sync::Arc;

/// Rows decoded per internal batch before the shard is concatenated.
const DECODE_BATCH_SIZE: usize = 8192;

/// Parse one shard body into a single record batch.
///
/// An empty (or whitespace-only) body yields a batch with no columns and no rows.
pub fn parse_delimited(body: &[u8], delimiter: u8) -> Result<RecordBatch, ArrowError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let format = Format::default()
        .with_header(false)
        .with_delimiter(delimiter);
    let (inferred, _) = format.infer_schema(Cursor::new(body), None)?;
    let schema = text_or_numeric(&inferred);

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(false)
        .with_delimiter(delimiter)
        .with_batch_size(DECODE_BATCH_SIZE)
        .build(Cursor::new(body))?;

    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    concat_batches(&schema, &batches)
}

/// Narrow an inferred schema to Int64, Float64, Utf8 and all-empty Null columns.
fn text_or_numeric(inferred: &Schema) -> SchemaRef {
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|field| {
            let data_type = match field.data_type() {
                DataType::Int64 => DataType::Int64,
                DataType::Float64 => DataType::Float64,
                DataType::Null => DataType::Null,
                _ => DataType::Utf8,
            };
            Field::new(field.name(), data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};

    #[test]
    fn test_parse_infers_numeric_and_text() {
        let body = b"a1,1,0.5\na2,2,1.5\n";
        let batch = parse_delimited(body, b',').unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 3);

        let schema = batch.schema();
        assert_eq!(schema.field(0).name(), "column_1");
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);
        assert_eq!(schema.field(2).data_type(), &DataType::Float64);

        let names = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "a1");
        assert_eq!(names.value(1), "a2");

        let ints = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ints.value(1), 2);

        let floats = batch.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert!((floats.value(0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_booleans_and_dates_are_text() {
        let body = b"true,2024-01-01\nfalse,2024-01-02\n";
        let batch = parse_delimited(body, b',').unwrap();

        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);

        let flags = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(flags.value(0), "true");
    }

    #[test]
    fn test_parse_mixed_column_is_text() {
        let body = b"1\nx\n3\n";
        let batch = parse_delimited(body, b',').unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(batch.num_rows(), 3);
    }

    #[test]
    fn test_parse_custom_delimiter() {
        let body = b"a|1\nb|2\n";
        let batch = parse_delimited(body, b'|').unwrap();
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Int64);
    }

    #[test]
    fn test_parse_empty_values_are_null() {
        let body = b"a,1\nb,\n";
        let batch = parse_delimited(body, b',').unwrap();
        let ints = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert!(ints.is_null(1));
    }

    #[test]
    fn test_parse_all_empty_column_stays_null() {
        let body = b"3,\n4,\n";
        let batch = parse_delimited(body, b',').unwrap();

        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Null);
        assert_eq!(batch.column(1).len(), 2);
    }

    #[test]
    fn test_parse_empty_body() {
        let batch = parse_delimited(b"", b',').unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 0);

        let batch = parse_delimited(b"\n\n", b',').unwrap();
        assert_eq!(batch.num_columns(), 0);
    }

    #[test]
    fn test_parse_ragged_rows_fail() {
        let body = b"a,1\nb,2,3\n";
        assert!(parse_delimited(body, b',').is_err());
    }
}
