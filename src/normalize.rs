//! Column normalization: yes/no recoding, date parsing and age derivation

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Date32Array, Float64Array, Int32Array, StringArray};
use arrow::compute::kernels::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};

use crate::error::{PipelineError, Result};
use crate::utils::arrow::{
    array_to_f64, column_date, downcast_array, get_column, naive_date_to_arrow_date, with_column,
};

/// Name of the column appended by [`derive_age`]
pub const AGE_COLUMN: &str = "age_years";

/// Recode a single yes/no answer
///
/// Case-insensitive: anything containing "yes" is `"1"`, anything containing
/// "no" is `"0"`, other values pass through unchanged.
#[must_use]
pub fn recode_yes_no_value(value: &str) -> &str {
    let lower = value.to_lowercase();
    if lower.contains("yes") {
        "1"
    } else if lower.contains("no") {
        "0"
    } else {
        value
    }
}

/// Recode a yes/no text column to Float64
///
/// Columns that type inference already made numeric are only cast.
///
/// # Errors
///
/// `TypeCast` if a value that is neither yes nor no is not a number
pub fn recode_yes_no(batch: &RecordBatch, column: &str) -> Result<RecordBatch> {
    let array = get_column(batch, column, "input")?;

    let recoded: ArrayRef = match array.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 => {
            let strings = cast::cast(array, &DataType::Utf8)?;
            let strings = downcast_array::<StringArray>(&strings, column, "Utf8")?;
            let mapped: StringArray = strings.iter().map(|v| v.map(recode_yes_no_value)).collect();
            Arc::new(mapped)
        }
        _ => Arc::clone(array),
    };

    let values = array_to_f64(&recoded, column)?;
    with_column(batch, column, Arc::new(Float64Array::from(values)))
}

/// Parse one date string with a chrono format
pub fn parse_date(value: &str, format: &str, column: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), format).map_err(|_| PipelineError::Parse {
        column: column.to_string(),
        value: value.to_string(),
        format: format.to_string(),
    })
}

fn parse_date_array(array: &ArrayRef, column: &str, format: &str) -> Result<ArrayRef> {
    match array.data_type() {
        DataType::Date32 => Ok(Arc::clone(array)),
        DataType::Date64 | DataType::Timestamp(_, _) => Ok(cast::cast(array, &DataType::Date32)?),
        DataType::Null => Ok(cast::cast(array, &DataType::Date32)?),
        DataType::Utf8 | DataType::LargeUtf8 => {
            let strings = cast::cast(array, &DataType::Utf8)?;
            let strings = downcast_array::<StringArray>(&strings, column, "Utf8")?;
            let days = strings
                .iter()
                .map(|value| match value {
                    None => Ok(None),
                    Some(s) if s.trim().is_empty() => Ok(None),
                    Some(s) => parse_date(s, format, column).map(|d| Some(naive_date_to_arrow_date(d))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Arc::new(Date32Array::from(days)))
        }
        other => Err(PipelineError::invalid_type(
            column,
            &format!("a date string (found {other:?})"),
        )),
    }
}

/// Parse string columns into Date32 using `format`
///
/// # Errors
///
/// `Parse` on the first value that does not match the format
pub fn parse_dates(batch: &RecordBatch, columns: &[&str], format: &str) -> Result<RecordBatch> {
    let mut out = batch.clone();
    for column in columns {
        let parsed = parse_date_array(get_column(&out, column, "input")?, column, format)?;
        out = with_column(&out, column, parsed)?;
    }
    Ok(out)
}

/// Age in calendar years: `current_year - birth year`
///
/// Whether the birthday has passed this year is not considered.
#[must_use]
pub fn age_in_years(birth_date: NaiveDate, current_year: i32) -> i32 {
    current_year - birth_date.year()
}

/// Append `age_years` computed from a Date32 birth date column
pub fn derive_age(batch: &RecordBatch, column: &str, current_year: i32) -> Result<RecordBatch> {
    let ages: Int32Array = column_date(batch, column, "input")?
        .into_iter()
        .map(|d| d.map(|d| age_in_years(d, current_year)))
        .collect();
    with_column(batch, AGE_COLUMN, Arc::new(ages))
}
