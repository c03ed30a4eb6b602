//! Typed value extraction from Arrow columns
//!
//! CSV type inference decides column types per file, so the feature code asks
//! for values in the representation it needs and these helpers do the
//! conversion. Nulls are preserved as `None`.

use arrow::array::{Array, ArrayRef, Date32Array, StringArray};
use arrow::compute::kernels::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;

use crate::error::{PipelineError, Result};
use crate::utils::arrow::array_utils::{downcast_array, get_column};

/// Convert Arrow Date32 value to `NaiveDate`
#[must_use]
pub fn arrow_date_to_naive_date(days_since_epoch: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?
        .checked_add_signed(chrono::Duration::days(i64::from(days_since_epoch)))
}

/// Convert a `NaiveDate` to days since the Unix epoch
#[must_use]
pub fn naive_date_to_arrow_date(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    i32::try_from(date.signed_duration_since(epoch).num_days()).unwrap_or(i32::MAX)
}

/// Whether a type is one of Arrow's numeric types
#[must_use]
pub const fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float16
            | DataType::Float32
            | DataType::Float64
    )
}

fn string_array(array: &ArrayRef, column: &str) -> Result<StringArray> {
    let casted = cast::cast(array, &DataType::Utf8)?;
    Ok(downcast_array::<StringArray>(&casted, column, "Utf8")?.clone())
}

/// Values of an array as `f64`
///
/// Numeric and boolean arrays are cast; string arrays are parsed after
/// trimming, and a value that is not a number fails with `TypeCast`.
pub fn array_to_f64(array: &ArrayRef, column: &str) -> Result<Vec<Option<f64>>> {
    match array.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 => {
            let strings = string_array(array, column)?;
            strings
                .iter()
                .map(|value| match value.map(str::trim) {
                    None | Some("") => Ok(None),
                    Some(s) => s.parse::<f64>().map(Some).map_err(|_| PipelineError::TypeCast {
                        column: column.to_string(),
                        value: s.to_string(),
                    }),
                })
                .collect()
        }
        DataType::Null => Ok(vec![None; array.len()]),
        t if is_numeric(t) || *t == DataType::Boolean => {
            let casted = cast::cast(array, &DataType::Float64)?;
            let floats =
                downcast_array::<arrow::array::Float64Array>(&casted, column, "Float64")?;
            Ok(floats.iter().collect())
        }
        other => Err(PipelineError::invalid_type(
            column,
            &format!("a numeric type (found {other:?})"),
        )),
    }
}

/// Values of an array as `i64`; floats and strings must hold whole numbers
pub fn array_to_i64(array: &ArrayRef, column: &str) -> Result<Vec<Option<i64>>> {
    array_to_f64(array, column)?
        .into_iter()
        .map(|value| match value {
            None => Ok(None),
            #[allow(clippy::cast_possible_truncation)]
            Some(v) if v.fract() == 0.0 && v.is_finite() => Ok(Some(v as i64)),
            Some(v) => Err(PipelineError::TypeCast {
                column: column.to_string(),
                value: v.to_string(),
            }),
        })
        .collect()
}

/// Values of an array rendered as strings (integers become their decimal form)
pub fn array_to_string(array: &ArrayRef, column: &str) -> Result<Vec<Option<String>>> {
    let strings = string_array(array, column)?;
    Ok(strings.iter().map(|v| v.map(str::to_string)).collect())
}

/// Values of a Date32 array
pub fn array_to_date(array: &ArrayRef, column: &str) -> Result<Vec<Option<NaiveDate>>> {
    let dates = downcast_array::<Date32Array>(array, column, "Date32")?;
    Ok(dates
        .iter()
        .map(|v| v.and_then(arrow_date_to_naive_date))
        .collect())
}

/// Named column of a batch as `f64` values
pub fn column_f64(batch: &RecordBatch, column: &str, table: &str) -> Result<Vec<Option<f64>>> {
    array_to_f64(get_column(batch, column, table)?, column)
}

/// Named column of a batch as `i64` values
pub fn column_i64(batch: &RecordBatch, column: &str, table: &str) -> Result<Vec<Option<i64>>> {
    array_to_i64(get_column(batch, column, table)?, column)
}

/// Named column of a batch as strings
pub fn column_string(
    batch: &RecordBatch,
    column: &str,
    table: &str,
) -> Result<Vec<Option<String>>> {
    array_to_string(get_column(batch, column, table)?, column)
}

/// Named Date32 column of a batch
pub fn column_date(
    batch: &RecordBatch,
    column: &str,
    table: &str,
) -> Result<Vec<Option<NaiveDate>>> {
    array_to_date(get_column(batch, column, table)?, column)
}
