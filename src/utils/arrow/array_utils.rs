//! Utilities for working with Arrow arrays.
//!
//! This module provides helpers for looking up columns by name, downcasting
//! them with clear error messages and rebuilding record batches with new or
//! replaced columns.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{PipelineError, Result};

/// Get a column from a record batch by name
///
/// # Arguments
///
/// * `batch` - The record batch containing the column
/// * `column_name` - The name of the column to extract
/// * `table` - Name of the table, used in the error message
///
/// # Errors
///
/// Returns `PipelineError::Schema` if the column does not exist
pub fn get_column<'a>(
    batch: &'a RecordBatch,
    column_name: &str,
    table: &str,
) -> Result<&'a ArrayRef> {
    let idx = batch
        .schema()
        .index_of(column_name)
        .map_err(|_| PipelineError::missing_column(column_name, table))?;
    Ok(batch.column(idx))
}

/// Downcast a column to a specific array type with clear error messages
///
/// # Type Parameters
///
/// * `A` - The target array type to downcast to
///
/// # Arguments
///
/// * `array` - The array reference to downcast
/// * `column_name` - The name of the column (for error messages)
/// * `expected_type_name` - A human-readable name of the expected type (for error messages)
pub fn downcast_array<'a, A: Array + 'static>(
    array: &'a ArrayRef,
    column_name: &str,
    expected_type_name: &str,
) -> Result<&'a A> {
    array
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| PipelineError::invalid_type(column_name, expected_type_name))
}

/// Names of all columns whose name contains `needle`, in schema order
#[must_use]
pub fn columns_containing(batch: &RecordBatch, needle: &str) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .filter(|f| f.name().contains(needle))
        .map(|f| f.name().clone())
        .collect()
}

/// Return a new batch where `column_name` holds `array`
///
/// An existing column with that name is replaced in place; otherwise the
/// column is appended. The resulting field is always nullable.
pub fn with_column(batch: &RecordBatch, column_name: &str, array: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let new_field = Arc::new(Field::new(column_name, array.data_type().clone(), true));

    let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();

    if let Ok(idx) = schema.index_of(column_name) {
        fields[idx] = new_field;
        columns[idx] = array;
    } else {
        fields.push(new_field);
        columns.push(array);
    }

    let new_schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    Ok(RecordBatch::try_new(new_schema, columns)?)
}
